use std::path::PathBuf;

use crate::errors::CrewError;

#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("worktree already exists at '{path}'")]
    AlreadyExists { path: PathBuf },

    #[error("no worktree found for branch '{branch}'")]
    NotFound { branch: String },

    #[error("git worktree operation failed: {message}")]
    GitFailed { message: String },

    #[error("post-create hook failed (exit {exit_code}): {output}")]
    HookFailed { exit_code: i32, output: String },

    #[error("failed to copy seed file '{pattern}': {message}")]
    SeedCopyFailed { pattern: String, message: String },

    #[error("script execution failed: {source}")]
    ExecError {
        #[from]
        source: crate::exec::ExecError,
    },

    #[error("IO operation failed: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl CrewError for WorktreeError {
    fn error_code(&self) -> &'static str {
        match self {
            WorktreeError::AlreadyExists { .. } => "WORKTREE_ALREADY_EXISTS",
            WorktreeError::NotFound { .. } => "WORKTREE_NOT_FOUND",
            WorktreeError::GitFailed { .. } => "WORKTREE_GIT_FAILED",
            WorktreeError::HookFailed { .. } => "WORKTREE_HOOK_FAILED",
            WorktreeError::SeedCopyFailed { .. } => "WORKTREE_SEED_COPY_FAILED",
            WorktreeError::ExecError { .. } => "EXEC_ERROR",
            WorktreeError::IoError { .. } => "IO_ERROR",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            WorktreeError::AlreadyExists { .. } | WorktreeError::NotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            WorktreeError::NotFound {
                branch: "crew-1".to_string()
            }
            .error_code(),
            "WORKTREE_NOT_FOUND"
        );
        assert_eq!(
            WorktreeError::HookFailed {
                exit_code: 2,
                output: "npm: not found".to_string()
            }
            .error_code(),
            "WORKTREE_HOOK_FAILED"
        );
    }

    #[test]
    fn test_hook_failed_message() {
        let err = WorktreeError::HookFailed {
            exit_code: 127,
            output: "direnv: not found".to_string(),
        };
        assert!(err.to_string().contains("127"));
        assert!(err.to_string().contains("direnv"));
    }
}
