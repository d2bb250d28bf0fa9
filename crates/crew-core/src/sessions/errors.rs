use crate::errors::CrewError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session named '{name}'")]
    NoSession { name: String },

    #[error("session '{name}' is already running")]
    SessionRunning { name: String },

    #[error("invalid session name '{name}'")]
    InvalidName { name: String },

    #[error("invalid environment variable name '{name}'")]
    InvalidEnvVarName { name: String },

    #[error("tmux operation failed: {message}")]
    TmuxFailed { message: String },

    #[error("wait cancelled for session '{name}'")]
    WaitCancelled { name: String },

    #[error("IO operation failed: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl CrewError for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            SessionError::NoSession { .. } => "NO_SESSION",
            SessionError::SessionRunning { .. } => "SESSION_RUNNING",
            SessionError::InvalidName { .. } => "INVALID_SESSION_NAME",
            SessionError::InvalidEnvVarName { .. } => "INVALID_ENV_VAR_NAME",
            SessionError::TmuxFailed { .. } => "TMUX_FAILED",
            SessionError::WaitCancelled { .. } => "WAIT_CANCELLED",
            SessionError::IoError { .. } => "IO_ERROR",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            SessionError::NoSession { .. }
                | SessionError::SessionRunning { .. }
                | SessionError::InvalidName { .. }
                | SessionError::InvalidEnvVarName { .. }
        )
    }
}
