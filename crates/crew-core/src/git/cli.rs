//! Centralized git CLI wrappers.
//!
//! All production `std::process::Command::new("git")` calls in crew-core
//! live here. Each function validates arguments, logs structured events,
//! and maps errors consistently. Read-only queries that never need
//! credentials use git2 (see `query.rs`); anything that may touch the
//! user's SSH agent or credential helpers goes through the CLI.

use std::path::Path;
use std::process::Output;

use tracing::{info, warn};

use super::errors::GitError;

/// Validate a git argument to prevent injection.
///
/// Rejects values that start with `-` (option injection), contain control
/// characters, or contain `::` sequences (refspec injection).
pub fn validate_git_arg(value: &str, label: &str) -> Result<(), GitError> {
    if value.starts_with('-') {
        return Err(GitError::OperationFailed {
            message: format!("Invalid {label}: '{value}' (must not start with '-')"),
        });
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(GitError::OperationFailed {
            message: format!("Invalid {label}: contains control characters"),
        });
    }
    if value.contains("::") {
        return Err(GitError::OperationFailed {
            message: format!("Invalid {label}: '::' sequences are not allowed"),
        });
    }
    Ok(())
}

fn run_git(dir: &Path, args: &[&str]) -> Result<Output, GitError> {
    std::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .map_err(|e| GitError::OperationFailed {
            message: format!("Failed to execute git {}: {e}", args.join(" ")),
        })
}

/// Merge a branch into the current branch.
///
/// On conflict the work tree is left in the conflicted state so the user
/// can resolve; the error lists the conflicted paths.
pub fn merge(dir: &Path, branch: &str, no_ff: bool) -> Result<(), GitError> {
    validate_git_arg(branch, "branch name")?;

    info!(
        event = "core.git.cli.merge_started",
        branch = branch,
        no_ff = no_ff,
        path = %dir.display()
    );

    let mut args = vec!["merge"];
    if no_ff {
        args.push("--no-ff");
    }
    args.push(branch);

    let output = run_git(dir, &args)?;
    if output.status.success() {
        info!(event = "core.git.cli.merge_completed", branch = branch);
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if stdout.contains("CONFLICT") || stderr.contains("CONFLICT") {
        let files = unmerged_files(dir).unwrap_or_default();
        warn!(
            event = "core.git.cli.merge_conflict",
            branch = branch,
            files = ?files,
        );
        return Err(GitError::MergeConflict {
            message: if files.is_empty() {
                format!("merging '{branch}' produced conflicts")
            } else {
                format!("merging '{branch}' conflicts in: {}", files.join(", "))
            },
        });
    }

    Err(GitError::OperationFailed {
        message: format!("git merge {branch} failed: {}", stderr.trim()),
    })
}

/// Paths currently in the unmerged state.
pub fn unmerged_files(dir: &Path) -> Result<Vec<String>, GitError> {
    let output = run_git(dir, &["diff", "--name-only", "--diff-filter=U"])?;
    if !output.status.success() {
        return Err(GitError::OperationFailed {
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// Probe whether merging `branch` into `base` would conflict, without
/// touching the work tree.
///
/// Uses `git merge-tree --write-tree`: exit 0 means clean, exit 1 means
/// conflicted, anything else is a hard failure.
pub fn merge_conflict_files(
    dir: &Path,
    branch: &str,
    base: &str,
) -> Result<Vec<String>, GitError> {
    validate_git_arg(branch, "branch name")?;
    validate_git_arg(base, "base branch")?;

    let output = run_git(
        dir,
        &[
            "merge-tree",
            "--write-tree",
            "--name-only",
            "--no-messages",
            base,
            branch,
        ],
    )?;

    match output.status.code() {
        Some(0) => Ok(Vec::new()),
        Some(1) => {
            // First line is the written tree OID; the conflicted paths
            // follow until a blank line.
            let stdout = String::from_utf8_lossy(&output.stdout);
            let files: Vec<String> = stdout
                .lines()
                .skip(1)
                .take_while(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .collect();
            info!(
                event = "core.git.cli.merge_conflict_detected",
                branch = branch,
                base = base,
                files = ?files,
            );
            Ok(files)
        }
        _ => Err(GitError::OperationFailed {
            message: format!(
                "git merge-tree {base} {branch} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }),
    }
}

/// Delete a local branch. `force` maps to `-D`.
///
/// Treats "branch not found" as `BranchNotFound` so callers can decide
/// whether that is benign.
pub fn delete_branch(dir: &Path, branch: &str, force: bool) -> Result<(), GitError> {
    validate_git_arg(branch, "branch name")?;

    info!(
        event = "core.git.cli.delete_branch_started",
        branch = branch,
        force = force,
    );

    let flag = if force { "-D" } else { "-d" };
    let output = run_git(dir, &["branch", flag, branch])?;

    if output.status.success() {
        info!(event = "core.git.cli.delete_branch_completed", branch = branch);
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("not found") {
        return Err(GitError::BranchNotFound {
            branch: branch.to_string(),
        });
    }
    Err(GitError::OperationFailed {
        message: format!("git branch {flag} {branch} failed: {}", stderr.trim()),
    })
}

/// Fetch a branch from a remote. Inherits the user's credential helpers.
pub fn fetch(dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
    validate_git_arg(remote, "remote name")?;
    validate_git_arg(branch, "branch name")?;

    let output = run_git(dir, &["fetch", remote, branch])?;
    if output.status.success() {
        info!(
            event = "core.git.cli.fetch_completed",
            remote = remote,
            branch = branch
        );
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            event = "core.git.cli.fetch_failed",
            remote = remote,
            branch = branch,
            stderr = %stderr.trim()
        );
        Err(GitError::OperationFailed {
            message: format!("git fetch {remote} {branch} failed: {}", stderr.trim()),
        })
    }
}

/// Push a branch to a remote. Inherits the user's credential helpers.
pub fn push(dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
    validate_git_arg(remote, "remote name")?;
    validate_git_arg(branch, "branch name")?;

    let output = run_git(dir, &["push", remote, branch])?;
    if output.status.success() {
        info!(
            event = "core.git.cli.push_completed",
            remote = remote,
            branch = branch
        );
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(GitError::OperationFailed {
            message: format!("git push {remote} {branch} failed: {}", stderr.trim()),
        })
    }
}
