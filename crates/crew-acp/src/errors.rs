use crew_core::CrewError;

#[derive(Debug, thiserror::Error)]
pub enum AcpError {
    #[error("no ACP execution state recorded for task {id} in namespace '{namespace}'")]
    StateNotFound { namespace: String, id: u64 },

    #[error("failed to spawn agent process: {message}")]
    SpawnFailed { message: String },

    #[error("agent process exited with {code:?}")]
    ProcessExited { code: Option<i32> },

    #[error("agent connection closed")]
    ConnectionClosed,

    #[error("command router failed: {message}")]
    RouterError { message: String },

    #[error("IPC channel closed")]
    IpcClosed,

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("agent returned an error: {code} {message}")]
    Rpc { code: i64, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{message}")]
    SaveFailed { message: String },

    #[error(transparent)]
    Lifecycle(#[from] crew_core::LifecycleError),

    #[error(transparent)]
    Task(#[from] crew_core::tasks::TaskError),

    #[error(transparent)]
    Session(#[from] crew_core::sessions::SessionError),

    #[error(transparent)]
    Worktree(#[from] crew_core::WorktreeError),

    #[error(transparent)]
    Git(#[from] crew_core::git::GitError),

    #[error("IO operation failed: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("serialization failed: {source}")]
    SerializationFailed {
        #[from]
        source: serde_json::Error,
    },
}

impl CrewError for AcpError {
    fn error_code(&self) -> &'static str {
        match self {
            AcpError::StateNotFound { .. } => "ACP_STATE_NOT_FOUND",
            AcpError::SpawnFailed { .. } => "ACP_SPAWN_FAILED",
            AcpError::ProcessExited { .. } => "ACP_PROCESS_EXITED",
            AcpError::ConnectionClosed => "ACP_CONNECTION_CLOSED",
            AcpError::RouterError { .. } => "ACP_ROUTER_ERROR",
            AcpError::IpcClosed => "ACP_IPC_CLOSED",
            AcpError::Protocol { .. } => "ACP_PROTOCOL_ERROR",
            AcpError::Rpc { .. } => "ACP_RPC_ERROR",
            AcpError::Cancelled => "ACP_CANCELLED",
            AcpError::SaveFailed { .. } => "ACP_SAVE_FAILED",
            AcpError::Lifecycle(e) => e.error_code(),
            AcpError::Task(e) => e.error_code(),
            AcpError::Session(e) => e.error_code(),
            AcpError::Worktree(e) => e.error_code(),
            AcpError::Git(e) => e.error_code(),
            AcpError::IoError { .. } => "IO_ERROR",
            AcpError::SerializationFailed { .. } => "SERIALIZATION_FAILED",
        }
    }

    fn is_user_error(&self) -> bool {
        match self {
            AcpError::StateNotFound { .. } => true,
            AcpError::Lifecycle(e) => e.is_user_error(),
            AcpError::Task(e) => e.is_user_error(),
            _ => false,
        }
    }
}
