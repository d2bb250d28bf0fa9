use crate::errors::CrewError;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task title cannot be empty")]
    EmptyTitle,

    #[error("comment text cannot be empty")]
    EmptyMessage,

    #[error("task file contains no drafts")]
    EmptyFile,

    #[error("invalid parent reference '{reference}'")]
    InvalidParentRef { reference: String },

    #[error("malformed draft file: {message}")]
    InvalidDraft { message: String },

    #[error("parent task {id} not found")]
    ParentNotFound { id: u64 },

    #[error("task {id} not found")]
    TaskNotFound { id: u64 },

    #[error("invalid comment type '{value}'. Valid: note, review, system")]
    InvalidCommentType { value: String },

    #[error("comment {index} not found on task {id}")]
    CommentNotFound { id: u64, index: usize },

    #[error("invalid task status '{value}'")]
    InvalidStatus { value: String },

    #[error("invalid execution substate '{value}'")]
    InvalidExecutionSubstate { value: String },

    #[error("store already initialized")]
    AlreadyInitialized,

    #[error("snapshot '{label}' not found")]
    SnapshotNotFound { label: String },

    #[error("migration conflict: task {id} exists in the destination with different content")]
    MigrationConflict { id: u64 },

    #[error("failed to read comments for task {id}: {message}")]
    CommentReadFailed { id: u64, message: String },

    #[error("IO operation failed: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("serialization failed: {message}")]
    SerializationFailed { message: String },
}

impl TaskError {
    pub(crate) fn serialization(e: serde_json::Error) -> Self {
        TaskError::SerializationFailed {
            message: e.to_string(),
        }
    }
}

impl CrewError for TaskError {
    fn error_code(&self) -> &'static str {
        match self {
            TaskError::EmptyTitle => "EMPTY_TITLE",
            TaskError::EmptyMessage => "EMPTY_MESSAGE",
            TaskError::EmptyFile => "EMPTY_FILE",
            TaskError::InvalidParentRef { .. } => "INVALID_PARENT_REF",
            TaskError::InvalidDraft { .. } => "INVALID_DRAFT",
            TaskError::ParentNotFound { .. } => "PARENT_NOT_FOUND",
            TaskError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            TaskError::InvalidCommentType { .. } => "INVALID_COMMENT_TYPE",
            TaskError::CommentNotFound { .. } => "COMMENT_NOT_FOUND",
            TaskError::InvalidStatus { .. } => "INVALID_STATUS",
            TaskError::InvalidExecutionSubstate { .. } => "INVALID_EXECUTION_SUBSTATE",
            TaskError::AlreadyInitialized => "ALREADY_INITIALIZED",
            TaskError::SnapshotNotFound { .. } => "SNAPSHOT_NOT_FOUND",
            TaskError::MigrationConflict { .. } => "MIGRATION_CONFLICT",
            TaskError::CommentReadFailed { .. } => "COMMENT_READ_FAILED",
            TaskError::IoError { .. } => "IO_ERROR",
            TaskError::SerializationFailed { .. } => "SERIALIZATION_FAILED",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            TaskError::EmptyTitle
                | TaskError::EmptyMessage
                | TaskError::EmptyFile
                | TaskError::InvalidParentRef { .. }
                | TaskError::InvalidDraft { .. }
                | TaskError::ParentNotFound { .. }
                | TaskError::TaskNotFound { .. }
                | TaskError::InvalidCommentType { .. }
                | TaskError::CommentNotFound { .. }
                | TaskError::InvalidStatus { .. }
                | TaskError::SnapshotNotFound { .. }
                | TaskError::MigrationConflict { .. }
        )
    }
}
