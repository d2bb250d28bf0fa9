use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("repository root not found at '{path}'")]
    RepoNotFound { path: PathBuf },

    #[error("failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Centralized path construction for the crew data directory.
///
/// Single source of truth for every path under the crew directory. The
/// directory lives at `<repo>/.crew` when the repository's `.gitignore`
/// covers it, and at `<repo>/.git/crew` otherwise, so an un-ignored data
/// directory never pollutes the user's working tree. Use `resolve()` in
/// production code and `from_dir()` in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrewPaths {
    crew_dir: PathBuf,
}

impl CrewPaths {
    /// Resolve the crew directory for a repository root.
    pub fn resolve(repo_root: &Path) -> Result<Self, PathError> {
        if !repo_root.join(".git").exists() {
            return Err(PathError::RepoNotFound {
                path: repo_root.to_path_buf(),
            });
        }

        let crew_dir = if gitignore_covers_crew(repo_root)? {
            repo_root.join(".crew")
        } else {
            repo_root.join(".git").join("crew")
        };

        Ok(Self { crew_dir })
    }

    /// Create paths from an explicit crew directory. Use in tests.
    pub fn from_dir(crew_dir: PathBuf) -> Self {
        Self { crew_dir }
    }

    /// The base crew directory.
    pub fn crew_dir(&self) -> &Path {
        &self.crew_dir
    }

    // --- Top-level subdirectories ---

    pub fn scripts_dir(&self) -> PathBuf {
        self.crew_dir.join("scripts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.crew_dir.join("logs")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.crew_dir.join("tasks")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.crew_dir.join("worktrees")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.crew_dir.join("snapshots")
    }

    pub fn acp_dir(&self) -> PathBuf {
        self.crew_dir.join("acp")
    }

    // --- Top-level files ---

    pub fn meta_file(&self) -> PathBuf {
        self.crew_dir.join("meta.json")
    }

    // --- Parameterized paths ---

    pub fn session_log(&self, session_name: &str) -> PathBuf {
        self.logs_dir().join(format!("{session_name}.log"))
    }

    pub fn task_script(&self, task_id: u64) -> PathBuf {
        self.scripts_dir().join(format!("task-{task_id}.sh"))
    }

    pub fn review_script(&self, task_id: u64, attempt: u32) -> PathBuf {
        self.scripts_dir()
            .join(format!("review-{task_id}-{attempt}.sh"))
    }

    pub fn review_prompt(&self, task_id: u64, attempt: u32) -> PathBuf {
        self.scripts_dir()
            .join(format!("review-{task_id}-{attempt}.prompt"))
    }

    pub fn acp_script(&self, task_id: u64) -> PathBuf {
        self.scripts_dir().join(format!("acp-{task_id}.sh"))
    }

    pub fn worktree_dir(&self, branch: &str) -> PathBuf {
        let safe_branch = branch.replace('/', "-");
        self.worktrees_dir().join(safe_branch)
    }

    pub fn namespace_tasks_dir(&self, namespace: &str) -> PathBuf {
        self.tasks_dir().join(slugify_namespace(namespace))
    }

    pub fn snapshot_dir(&self, label: &str) -> PathBuf {
        let safe_label = label.replace('/', "-");
        self.snapshots_dir().join(safe_label)
    }

    // --- ACP paths ---

    pub fn acp_namespace_dir(&self, namespace: &str) -> PathBuf {
        self.acp_dir().join(slugify_namespace(namespace))
    }

    pub fn acp_state_file(&self, namespace: &str, task_id: u64) -> PathBuf {
        self.acp_namespace_dir(namespace)
            .join(format!("task-{task_id}.state.json"))
    }

    pub fn acp_events_file(&self, namespace: &str, task_id: u64) -> PathBuf {
        self.acp_namespace_dir(namespace)
            .join(format!("task-{task_id}.events.jsonl"))
    }

    pub fn acp_socket(&self, namespace: &str, task_id: u64) -> PathBuf {
        self.acp_namespace_dir(namespace)
            .join(format!("task-{task_id}.sock"))
    }
}

/// Slugify a namespace for filesystem and IPC use.
///
/// Lowercases, collapses runs of non-alphanumeric characters into a single
/// `-`, and trims leading/trailing dashes. Empty input maps to `"default"`.
pub fn slugify_namespace(namespace: &str) -> String {
    let mut slug = String::with_capacity(namespace.len());
    let mut pending_dash = false;

    for ch in namespace.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "default".to_string()
    } else {
        slug
    }
}

/// Whether the repository's `.gitignore` covers the `.crew` directory.
///
/// A non-comment line counts after trimming whitespace and stripping a
/// single leading `/` when it equals exactly `.crew` or `.crew/`. CRLF is
/// normalised to LF before comparison. A missing `.gitignore` means not
/// covered.
pub fn gitignore_covers_crew(repo_root: &Path) -> Result<bool, PathError> {
    let gitignore = repo_root.join(".gitignore");

    let content = match std::fs::read_to_string(&gitignore) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(PathError::ReadFailed {
                path: gitignore,
                source: e,
            });
        }
    };

    let content = content.replace("\r\n", "\n");
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let stripped = trimmed.strip_prefix('/').unwrap_or(trimmed);
        if stripped == ".crew" || stripped == ".crew/" {
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_paths() -> CrewPaths {
        CrewPaths::from_dir(PathBuf::from("/repo/.crew"))
    }

    #[test]
    fn test_from_dir() {
        let paths = CrewPaths::from_dir(PathBuf::from("/tmp/crew"));
        assert_eq!(paths.crew_dir(), Path::new("/tmp/crew"));
    }

    #[test]
    fn test_top_level_dirs() {
        let paths = test_paths();
        assert_eq!(paths.scripts_dir(), PathBuf::from("/repo/.crew/scripts"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/repo/.crew/logs"));
        assert_eq!(paths.tasks_dir(), PathBuf::from("/repo/.crew/tasks"));
        assert_eq!(
            paths.worktrees_dir(),
            PathBuf::from("/repo/.crew/worktrees")
        );
        assert_eq!(
            paths.snapshots_dir(),
            PathBuf::from("/repo/.crew/snapshots")
        );
        assert_eq!(paths.acp_dir(), PathBuf::from("/repo/.crew/acp"));
        assert_eq!(paths.meta_file(), PathBuf::from("/repo/.crew/meta.json"));
    }

    #[test]
    fn test_session_log() {
        assert_eq!(
            test_paths().session_log("crew-7"),
            PathBuf::from("/repo/.crew/logs/crew-7.log")
        );
        assert_eq!(
            test_paths().session_log("crew-7-review"),
            PathBuf::from("/repo/.crew/logs/crew-7-review.log")
        );
    }

    #[test]
    fn test_script_paths() {
        assert_eq!(
            test_paths().task_script(3),
            PathBuf::from("/repo/.crew/scripts/task-3.sh")
        );
        assert_eq!(
            test_paths().review_script(3, 2),
            PathBuf::from("/repo/.crew/scripts/review-3-2.sh")
        );
        assert_eq!(
            test_paths().review_prompt(3, 2),
            PathBuf::from("/repo/.crew/scripts/review-3-2.prompt")
        );
        assert_eq!(
            test_paths().acp_script(3),
            PathBuf::from("/repo/.crew/scripts/acp-3.sh")
        );
    }

    #[test]
    fn test_worktree_dir_sanitizes_slashes() {
        assert_eq!(
            test_paths().worktree_dir("crew-5"),
            PathBuf::from("/repo/.crew/worktrees/crew-5")
        );
        assert_eq!(
            test_paths().worktree_dir("feature/auth"),
            PathBuf::from("/repo/.crew/worktrees/feature-auth")
        );
    }

    #[test]
    fn test_acp_paths() {
        let paths = test_paths();
        assert_eq!(
            paths.acp_state_file("default", 1),
            PathBuf::from("/repo/.crew/acp/default/task-1.state.json")
        );
        assert_eq!(
            paths.acp_events_file("Team Alpha", 1),
            PathBuf::from("/repo/.crew/acp/team-alpha/task-1.events.jsonl")
        );
        assert_eq!(
            paths.acp_socket("default", 9),
            PathBuf::from("/repo/.crew/acp/default/task-9.sock")
        );
    }

    #[test]
    fn test_slugify_namespace() {
        assert_eq!(slugify_namespace("default"), "default");
        assert_eq!(slugify_namespace("Team Alpha"), "team-alpha");
        assert_eq!(slugify_namespace("  Ops / Infra  "), "ops-infra");
        assert_eq!(slugify_namespace(""), "default");
        assert_eq!(slugify_namespace("___"), "default");
        assert_eq!(slugify_namespace("A--B"), "a-b");
    }

    #[test]
    fn test_resolve_requires_git_repo() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = CrewPaths::resolve(tmp.path());
        assert!(matches!(result, Err(PathError::RepoNotFound { .. })));
    }

    #[test]
    fn test_resolve_without_gitignore_uses_git_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();

        let paths = CrewPaths::resolve(tmp.path()).unwrap();
        assert_eq!(paths.crew_dir(), tmp.path().join(".git").join("crew"));
    }

    #[test]
    fn test_resolve_with_ignored_crew_uses_repo_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "target/\n.crew/\n").unwrap();

        let paths = CrewPaths::resolve(tmp.path()).unwrap();
        assert_eq!(paths.crew_dir(), tmp.path().join(".crew"));
    }

    #[test]
    fn test_gitignore_matching_rules() {
        let tmp = tempfile::TempDir::new().unwrap();
        let write = |content: &str| std::fs::write(tmp.path().join(".gitignore"), content).unwrap();

        write(".crew\n");
        assert!(gitignore_covers_crew(tmp.path()).unwrap());

        write(".crew/\n");
        assert!(gitignore_covers_crew(tmp.path()).unwrap());

        write("/.crew\n");
        assert!(gitignore_covers_crew(tmp.path()).unwrap());

        write("  /.crew/  \n");
        assert!(gitignore_covers_crew(tmp.path()).unwrap());

        // CRLF is normalised before comparison
        write(".crew/\r\n");
        assert!(gitignore_covers_crew(tmp.path()).unwrap());

        // Comments do not count
        write("# .crew\n");
        assert!(!gitignore_covers_crew(tmp.path()).unwrap());

        // Substring or glob matches do not count
        write(".crew-data\n");
        assert!(!gitignore_covers_crew(tmp.path()).unwrap());
        write(".crew/*\n");
        assert!(!gitignore_covers_crew(tmp.path()).unwrap());

        // Only a single leading slash is stripped
        write("//.crew\n");
        assert!(!gitignore_covers_crew(tmp.path()).unwrap());
    }

    #[test]
    fn test_gitignore_missing_means_not_covered() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(!gitignore_covers_crew(tmp.path()).unwrap());
    }

    #[test]
    fn test_namespace_tasks_dir() {
        assert_eq!(
            test_paths().namespace_tasks_dir("Team Alpha"),
            PathBuf::from("/repo/.crew/tasks/team-alpha")
        );
        assert_eq!(
            test_paths().namespace_tasks_dir(""),
            PathBuf::from("/repo/.crew/tasks/default")
        );
    }

    #[test]
    fn test_snapshot_dir() {
        assert_eq!(
            test_paths().snapshot_dir("pre-migrate"),
            PathBuf::from("/repo/.crew/snapshots/pre-migrate")
        );
        assert_eq!(
            test_paths().snapshot_dir("a/b"),
            PathBuf::from("/repo/.crew/snapshots/a-b")
        );
    }
}
