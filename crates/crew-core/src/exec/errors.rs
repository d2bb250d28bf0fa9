use crate::errors::CrewError;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn command: {source}")]
    SpawnFailed { source: std::io::Error },

    #[error("command cancelled")]
    Cancelled,

    #[error("IO operation failed: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl CrewError for ExecError {
    fn error_code(&self) -> &'static str {
        match self {
            ExecError::SpawnFailed { .. } => "EXEC_SPAWN_FAILED",
            ExecError::Cancelled => "EXEC_CANCELLED",
            ExecError::IoError { .. } => "IO_ERROR",
        }
    }
}
