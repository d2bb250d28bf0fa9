//! Worktree provisioning and teardown.
//!
//! One worktree per crew branch, living under `<crew_dir>/worktrees/`.
//! Creation follows the create-setup-rollback protocol: the caller must
//! `remove()` on any failure after `create()` succeeded.

pub mod errors;

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crew_config::WorktreeConfig;
use crew_paths::CrewPaths;

pub use errors::WorktreeError;

use crate::exec::ScriptRunner;

/// Create/resolve/remove per-branch worktrees.
pub trait WorktreeManager: Send + Sync {
    fn exists(&self, branch: &str) -> Result<bool, WorktreeError>;
    /// Create a worktree on `branch` (creating the branch from `base_ref`
    /// when it does not exist yet). Must not move the parent repository's
    /// HEAD.
    fn create(&self, branch: &str, base_ref: &str) -> Result<PathBuf, WorktreeError>;
    /// Path of the existing worktree for `branch`.
    fn resolve(&self, branch: &str) -> Result<PathBuf, WorktreeError>;
    /// Remove the worktree (not the branch).
    fn remove(&self, branch: &str) -> Result<(), WorktreeError>;
    /// Branches that currently have a worktree under the crew directory.
    fn list(&self) -> Result<Vec<String>, WorktreeError>;
    /// Idempotent seeding: copy configured files from the parent repo and
    /// run the post-create hook.
    fn setup_worktree(&self, path: &Path, config: &WorktreeConfig) -> Result<(), WorktreeError>;
}

/// Production worktree manager shelling out to `git worktree`.
pub struct GitWorktreeManager {
    repo_root: PathBuf,
    worktrees_dir: PathBuf,
    runner: std::sync::Arc<dyn ScriptRunner>,
}

impl GitWorktreeManager {
    pub fn new(
        repo_root: PathBuf,
        paths: &CrewPaths,
        runner: std::sync::Arc<dyn ScriptRunner>,
    ) -> Self {
        Self {
            repo_root,
            worktrees_dir: paths.worktrees_dir(),
            runner,
        }
    }

    fn worktree_path(&self, branch: &str) -> PathBuf {
        self.worktrees_dir.join(branch.replace('/', "-"))
    }

    fn run_git(&self, args: &[&str]) -> Result<std::process::Output, WorktreeError> {
        std::process::Command::new("git")
            .current_dir(&self.repo_root)
            .args(args)
            .output()
            .map_err(|e| WorktreeError::GitFailed {
                message: format!("failed to execute git {}: {e}", args.join(" ")),
            })
    }

    fn branch_exists(&self, branch: &str) -> bool {
        git2::Repository::open(&self.repo_root)
            .map(|repo| repo.find_branch(branch, git2::BranchType::Local).is_ok())
            .unwrap_or(false)
    }
}

impl WorktreeManager for GitWorktreeManager {
    fn exists(&self, branch: &str) -> Result<bool, WorktreeError> {
        Ok(self.worktree_path(branch).exists())
    }

    fn create(&self, branch: &str, base_ref: &str) -> Result<PathBuf, WorktreeError> {
        crate::git::cli::validate_git_arg(branch, "branch name")
            .map_err(|e| WorktreeError::GitFailed {
                message: e.to_string(),
            })?;
        crate::git::cli::validate_git_arg(base_ref, "base ref").map_err(|e| {
            WorktreeError::GitFailed {
                message: e.to_string(),
            }
        })?;

        let path = self.worktree_path(branch);
        if path.exists() {
            return Err(WorktreeError::AlreadyExists { path });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(
            event = "core.worktree.create_started",
            branch = branch,
            base = base_ref,
            path = %path.display(),
        );

        let path_str = path.to_string_lossy().to_string();
        // Reuse the branch when a previous task left it behind; otherwise
        // branch off the base ref. `git worktree add` never moves the
        // parent repository's HEAD.
        let output = if self.branch_exists(branch) {
            self.run_git(&["worktree", "add", &path_str, branch])?
        } else {
            self.run_git(&["worktree", "add", "-b", branch, &path_str, base_ref])?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::GitFailed {
                message: format!("git worktree add failed: {}", stderr.trim()),
            });
        }

        info!(event = "core.worktree.create_completed", branch = branch);
        Ok(path)
    }

    fn resolve(&self, branch: &str) -> Result<PathBuf, WorktreeError> {
        let path = self.worktree_path(branch);
        if path.exists() {
            Ok(path)
        } else {
            Err(WorktreeError::NotFound {
                branch: branch.to_string(),
            })
        }
    }

    fn remove(&self, branch: &str) -> Result<(), WorktreeError> {
        let path = self.worktree_path(branch);
        if !path.exists() {
            debug!(
                event = "core.worktree.remove_missing",
                branch = branch,
                "Worktree already gone, pruning administrative state only"
            );
            let _ = self.run_git(&["worktree", "prune"]);
            return Ok(());
        }

        let path_str = path.to_string_lossy().to_string();
        let output = self.run_git(&["worktree", "remove", "--force", &path_str])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                event = "core.worktree.remove_failed",
                branch = branch,
                stderr = %stderr.trim(),
            );
            return Err(WorktreeError::GitFailed {
                message: format!("git worktree remove failed: {}", stderr.trim()),
            });
        }

        let _ = self.run_git(&["worktree", "prune"]);
        info!(event = "core.worktree.remove_completed", branch = branch);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, WorktreeError> {
        let entries = match std::fs::read_dir(&self.worktrees_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorktreeError::IoError { source: e }),
        };

        let mut branches = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                branches.push(name.to_string());
            }
        }
        branches.sort();
        Ok(branches)
    }

    fn setup_worktree(&self, path: &Path, config: &WorktreeConfig) -> Result<(), WorktreeError> {
        for pattern in &config.copy_files {
            let full_pattern = self.repo_root.join(pattern);
            let matches =
                glob::glob(&full_pattern.to_string_lossy()).map_err(|e| {
                    WorktreeError::SeedCopyFailed {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    }
                })?;

            for source in matches.flatten() {
                if !source.is_file() {
                    continue;
                }
                let Ok(relative) = source.strip_prefix(&self.repo_root) else {
                    continue;
                };
                let target = path.join(relative);
                if target.exists() {
                    continue;
                }
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&source, &target).map_err(|e| WorktreeError::SeedCopyFailed {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                debug!(
                    event = "core.worktree.seed_copied",
                    file = %relative.display(),
                );
            }
        }

        if let Some(ref hook) = config.post_create {
            let result = self.runner.run(path, hook)?;
            if !result.success() {
                return Err(WorktreeError::HookFailed {
                    exit_code: result.exit_code,
                    output: result.output,
                });
            }
            info!(event = "core.worktree.post_create_completed", path = %path.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ShellExecutor;
    use crate::git::test_support;
    use std::sync::Arc;

    fn manager(repo: &Path) -> (CrewPaths, GitWorktreeManager) {
        let paths = CrewPaths::from_dir(repo.join(".git").join("crew"));
        let manager =
            GitWorktreeManager::new(repo.to_path_buf(), &paths, Arc::new(ShellExecutor));
        (paths, manager)
    }

    fn repo() -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        test_support::init_repo_with_commit(tmp.path()).unwrap();
        tmp
    }

    #[test]
    fn test_create_resolve_remove_cycle() {
        let repo = repo();
        let (_paths, manager) = manager(repo.path());
        let base = test_support::head_branch(repo.path()).unwrap();

        assert!(!manager.exists("crew-1").unwrap());
        let path = manager.create("crew-1", &base).unwrap();
        assert!(path.exists());
        assert!(path.join("README.md").exists());
        assert!(manager.exists("crew-1").unwrap());
        assert_eq!(manager.resolve("crew-1").unwrap(), path);
        assert_eq!(manager.list().unwrap(), vec!["crew-1".to_string()]);

        manager.remove("crew-1").unwrap();
        assert!(!manager.exists("crew-1").unwrap());
        assert!(matches!(
            manager.resolve("crew-1"),
            Err(WorktreeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_create_does_not_move_parent_head() {
        let repo = repo();
        let (_paths, manager) = manager(repo.path());
        let before = test_support::head_branch(repo.path()).unwrap();

        manager.create("crew-2", &before).unwrap();

        let after = test_support::head_branch(repo.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_create_duplicate_errors() {
        let repo = repo();
        let (_paths, manager) = manager(repo.path());
        let base = test_support::head_branch(repo.path()).unwrap();

        manager.create("crew-3", &base).unwrap();
        let result = manager.create("crew-3", &base);
        assert!(matches!(result, Err(WorktreeError::AlreadyExists { .. })));
    }

    #[test]
    fn test_create_reuses_existing_branch() {
        let repo = repo();
        let (_paths, manager) = manager(repo.path());
        let base = test_support::head_branch(repo.path()).unwrap();
        test_support::create_branch_with_file(repo.path(), "crew-4", "kept.txt", "x").unwrap();

        let path = manager.create("crew-4", &base).unwrap();
        // The branch's own commit is checked out, not a fresh base branch
        assert!(path.join("kept.txt").exists());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let repo = repo();
        let (_paths, manager) = manager(repo.path());
        assert!(manager.remove("never-created").is_ok());
    }

    #[test]
    fn test_setup_copies_seeds_idempotently() {
        let repo = repo();
        let (_paths, manager) = manager(repo.path());
        let base = test_support::head_branch(repo.path()).unwrap();
        std::fs::write(repo.path().join(".env"), "SECRET=1\n").unwrap();

        let path = manager.create("crew-5", &base).unwrap();
        let config = WorktreeConfig {
            copy_files: vec![".env".to_string()],
            post_create: None,
        };

        manager.setup_worktree(&path, &config).unwrap();
        assert_eq!(
            std::fs::read_to_string(path.join(".env")).unwrap(),
            "SECRET=1\n"
        );

        // Second run leaves the (possibly edited) seed alone
        std::fs::write(path.join(".env"), "SECRET=2\n").unwrap();
        manager.setup_worktree(&path, &config).unwrap();
        assert_eq!(
            std::fs::read_to_string(path.join(".env")).unwrap(),
            "SECRET=2\n"
        );
    }

    #[test]
    fn test_setup_runs_post_create_hook() {
        let repo = repo();
        let (_paths, manager) = manager(repo.path());
        let base = test_support::head_branch(repo.path()).unwrap();
        let path = manager.create("crew-6", &base).unwrap();

        let config = WorktreeConfig {
            copy_files: Vec::new(),
            post_create: Some("touch hook-ran".to_string()),
        };
        manager.setup_worktree(&path, &config).unwrap();
        assert!(path.join("hook-ran").exists());
    }

    #[test]
    fn test_setup_surfaces_hook_failure() {
        let repo = repo();
        let (_paths, manager) = manager(repo.path());
        let base = test_support::head_branch(repo.path()).unwrap();
        let path = manager.create("crew-7", &base).unwrap();

        let config = WorktreeConfig {
            copy_files: Vec::new(),
            post_create: Some("echo boom; exit 9".to_string()),
        };
        let result = manager.setup_worktree(&path, &config);
        match result {
            Err(WorktreeError::HookFailed { exit_code, output }) => {
                assert_eq!(exit_code, 9);
                assert!(output.contains("boom"));
            }
            other => panic!("expected HookFailed, got {other:?}"),
        }
    }
}
