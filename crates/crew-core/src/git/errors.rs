use crate::errors::CrewError;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("not in a git repository")]
    NotInRepository,

    #[error("repository is in detached HEAD state, no current branch")]
    DetachedHead,

    #[error("branch '{branch}' not found")]
    BranchNotFound { branch: String },

    #[error("merge conflict: {message}")]
    MergeConflict { message: String },

    #[error("git operation failed: {message}")]
    OperationFailed { message: String },

    #[error("git error: {source}")]
    Git2Error {
        #[from]
        source: git2::Error,
    },

    #[error("IO operation failed: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl CrewError for GitError {
    fn error_code(&self) -> &'static str {
        match self {
            GitError::NotInRepository => "NOT_IN_REPOSITORY",
            GitError::DetachedHead => "DETACHED_HEAD",
            GitError::BranchNotFound { .. } => "BRANCH_NOT_FOUND",
            GitError::MergeConflict { .. } => "MERGE_CONFLICT",
            GitError::OperationFailed { .. } => "GIT_OPERATION_FAILED",
            GitError::Git2Error { .. } => "GIT_ERROR",
            GitError::IoError { .. } => "IO_ERROR",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            GitError::NotInRepository
                | GitError::DetachedHead
                | GitError::BranchNotFound { .. }
                | GitError::MergeConflict { .. }
        )
    }
}
