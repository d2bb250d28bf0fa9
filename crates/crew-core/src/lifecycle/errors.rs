use crate::errors::CrewError;
use crate::tasks::TaskStatus;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("task {id} not found")]
    TaskNotFound { id: u64 },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("task {id} is blocked: {reason}")]
    TaskBlocked { id: u64, reason: String },

    #[error("no agent configured for this task and no default agent set")]
    NoAgent,

    #[error("agent '{name}' not found in the agent registry")]
    AgentNotFound { name: String },

    #[error("agent '{name}' is disabled")]
    AgentDisabled { name: String },

    #[error("worktree at '{path}' has uncommitted changes")]
    UncommittedChanges { path: String },

    #[error("merge conflict: {message}")]
    MergeConflict { message: String },

    #[error("current branch '{current}' is not the default branch '{default}'")]
    NotOnMainBranch { current: String, default: String },

    #[error("current branch '{current}' does not match merge target '{target}'")]
    NotOnBaseBranch { current: String, target: String },

    #[error("agent setup script failed (exit {exit_code}): {output}")]
    SetupScriptFailed { exit_code: i32, output: String },

    #[error("complete command failed (exit {exit_code}): {output}")]
    CompleteCommandFailed { exit_code: i32, output: String },

    #[error("reviewer produced no result marker. Last session output:\n{log_tail}")]
    NoReviewComment { log_tail: String },

    #[error("review did not succeed after {attempts} attempt(s)")]
    ReviewFailed { attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{message}")]
    RollbackFailed { message: String },

    #[error(transparent)]
    Task(#[from] crate::tasks::TaskError),

    #[error(transparent)]
    Git(#[from] crate::git::GitError),

    #[error(transparent)]
    Worktree(#[from] crate::worktree::WorktreeError),

    #[error(transparent)]
    Session(#[from] crate::sessions::SessionError),

    #[error(transparent)]
    Exec(#[from] crate::exec::ExecError),
}

impl CrewError for LifecycleError {
    fn error_code(&self) -> &'static str {
        match self {
            LifecycleError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            LifecycleError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LifecycleError::TaskBlocked { .. } => "TASK_BLOCKED",
            LifecycleError::NoAgent => "NO_AGENT",
            LifecycleError::AgentNotFound { .. } => "AGENT_NOT_FOUND",
            LifecycleError::AgentDisabled { .. } => "AGENT_DISABLED",
            LifecycleError::UncommittedChanges { .. } => "UNCOMMITTED_CHANGES",
            LifecycleError::MergeConflict { .. } => "MERGE_CONFLICT",
            LifecycleError::NotOnMainBranch { .. } => "NOT_ON_MAIN_BRANCH",
            LifecycleError::NotOnBaseBranch { .. } => "NOT_ON_BASE_BRANCH",
            LifecycleError::SetupScriptFailed { .. } => "SETUP_SCRIPT_FAILED",
            LifecycleError::CompleteCommandFailed { .. } => "COMPLETE_COMMAND_FAILED",
            LifecycleError::NoReviewComment { .. } => "NO_REVIEW_COMMENT",
            LifecycleError::ReviewFailed { .. } => "REVIEW_FAILED",
            LifecycleError::Cancelled => "CANCELLED",
            LifecycleError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            LifecycleError::Task(e) => e.error_code(),
            LifecycleError::Git(e) => e.error_code(),
            LifecycleError::Worktree(e) => e.error_code(),
            LifecycleError::Session(e) => e.error_code(),
            LifecycleError::Exec(e) => e.error_code(),
        }
    }

    fn is_user_error(&self) -> bool {
        match self {
            LifecycleError::TaskNotFound { .. }
            | LifecycleError::InvalidTransition { .. }
            | LifecycleError::TaskBlocked { .. }
            | LifecycleError::NoAgent
            | LifecycleError::AgentNotFound { .. }
            | LifecycleError::AgentDisabled { .. }
            | LifecycleError::UncommittedChanges { .. }
            | LifecycleError::MergeConflict { .. }
            | LifecycleError::NotOnMainBranch { .. }
            | LifecycleError::NotOnBaseBranch { .. } => true,
            LifecycleError::Task(e) => e.is_user_error(),
            LifecycleError::Git(e) => e.is_user_error(),
            LifecycleError::Worktree(e) => e.is_user_error(),
            LifecycleError::Session(e) => e.is_user_error(),
            _ => false,
        }
    }
}

impl LifecycleError {
    /// Join a rollback failure onto this error so neither is swallowed.
    pub fn with_rollback_failure(self, rollback: &dyn std::error::Error) -> Self {
        LifecycleError::RollbackFailed {
            message: crate::errors::join_rollback_error(&self, rollback),
        }
    }

    pub fn from_agent_lookup(e: crew_config::AgentLookupError) -> Self {
        match e {
            crew_config::AgentLookupError::NotFound { name } => {
                LifecycleError::AgentNotFound { name }
            }
            crew_config::AgentLookupError::Disabled { name } => {
                LifecycleError::AgentDisabled { name }
            }
        }
    }
}
