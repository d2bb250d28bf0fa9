//! Task status machine.
//!
//! Statuses are a closed set. The legacy spellings `reviewing` and
//! `for_review` normalise to `in_review` at parse time; anything else fails
//! closed.

use serde::{Deserialize, Serialize};

/// Current status model version. Rows with an older `status_version` are
/// normalised on read by the migration path.
pub const STATUS_VERSION_CURRENT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    // Legacy stores wrote several spellings for the post-work state.
    #[serde(alias = "for_review", alias = "reviewing")]
    InReview,
    Stopped,
    Done,
    Closed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Done => "done",
            TaskStatus::Closed => "closed",
            TaskStatus::Error => "error",
        }
    }

    /// Parse a status string, normalising legacy aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            // Legacy stores used several spellings for the post-work state.
            "in_review" | "for_review" | "reviewing" => Some(TaskStatus::InReview),
            "stopped" => Some(TaskStatus::Stopped),
            "done" => Some(TaskStatus::Done),
            "closed" => Some(TaskStatus::Closed),
            "error" => Some(TaskStatus::Error),
            _ => None,
        }
    }

    /// Whether the poller stops waiting on this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Closed | TaskStatus::Error)
    }

    /// Absorbing statuses accept no forward transition (only the
    /// `closed -> closed` no-op).
    pub fn is_absorbing(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Closed)
    }

    /// Whether `start` may pick the task up, ignoring `block_reason`.
    pub fn is_startable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Todo | TaskStatus::Stopped | TaskStatus::InReview | TaskStatus::Error
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown task status '{s}'"))
    }
}

/// Whether the status machine allows `from -> to`.
///
/// `closed -> closed` is the only transition an absorbing status accepts;
/// it is a no-op at the use-case level.
pub fn transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    match (from, to) {
        // start / acp_start
        (Todo | Stopped | InReview | Error, InProgress) => true,
        // ACP prompt turn
        (InProgress, InProgress) => true,
        // session ended
        (InProgress, InReview) => true,
        (InProgress, Error) => true,
        // stop
        (InProgress, Stopped) => true,
        // complete
        (InProgress | InReview | Error, Done) => true,
        // close / merge from any non-absorbing state
        (from, Closed) if !from.is_absorbing() => true,
        // post-merge bookkeeping
        (Done, Closed) => true,
        // no-op close of an already-closed task
        (Closed, Closed) => true,
        _ => false,
    }
}

/// Execution substate of a task on the ACP path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSubstate {
    #[default]
    Idle,
    Running,
    AwaitingPermission,
    AwaitingUser,
}

impl ExecutionSubstate {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionSubstate::Idle => "idle",
            ExecutionSubstate::Running => "running",
            ExecutionSubstate::AwaitingPermission => "awaiting_permission",
            ExecutionSubstate::AwaitingUser => "awaiting_user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(ExecutionSubstate::Idle),
            "running" => Some(ExecutionSubstate::Running),
            "awaiting_permission" => Some(ExecutionSubstate::AwaitingPermission),
            "awaiting_user" => Some(ExecutionSubstate::AwaitingUser),
            _ => None,
        }
    }

    /// Whether the agent process is expected to be alive in this substate.
    pub fn is_active(&self) -> bool {
        !matches!(self, ExecutionSubstate::Idle)
    }
}

impl std::fmt::Display for ExecutionSubstate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionSubstate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown execution substate '{s}'"))
    }
}
