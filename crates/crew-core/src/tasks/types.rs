//! Task and comment data structures.

use serde::{Deserialize, Serialize};

use super::status::{ExecutionSubstate, STATUS_VERSION_CURRENT, TaskStatus};

/// Namespace used when a task names none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Author string reviewer-authored comments carry.
pub const REVIEWER_AUTHOR: &str = "reviewer";

/// A unit of agentic work with lifecycle and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    /// RFC 3339 UTC creation time.
    pub created: String,
    /// RFC 3339 UTC start time; `None` before the first `start`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    /// Name of the currently bound agent; empty when none.
    pub agent: String,
    /// Name of the current session; empty when none.
    pub session: String,
    /// Linked issue number; 0 when unlinked.
    pub issue: u64,
    /// Linked pull-request number; 0 when unlinked.
    pub pr: u64,
    /// Explicit base branch; empty means the resolver uses the default.
    pub base_branch: String,
    /// Labels in presentation order, no duplicates.
    pub labels: Vec<String>,
    /// Tri-state review opt-out; `None` defers to configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_review: Option<bool>,
    pub review_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_review_at: Option<String>,
    pub last_review_text: String,
    /// Non-empty when the task is blocked; starting or continuing work must
    /// fail while set.
    pub block_reason: String,
    /// ACP-path execution substate.
    pub execution_substate: ExecutionSubstate,
    /// Logical grouping; empty normalises to `default`.
    pub namespace: String,
    /// Status-model version; 0 means the row predates versioning.
    pub status_version: u32,
    /// Recorded by `close`; empty otherwise.
    pub close_reason: String,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: 0,
            parent_id: None,
            title: String::new(),
            description: String::new(),
            status: TaskStatus::Todo,
            created: String::new(),
            started: None,
            agent: String::new(),
            session: String::new(),
            issue: 0,
            pr: 0,
            base_branch: String::new(),
            labels: Vec::new(),
            skip_review: None,
            review_count: 0,
            last_review_at: None,
            last_review_text: String::new(),
            block_reason: String::new(),
            execution_substate: ExecutionSubstate::Idle,
            namespace: DEFAULT_NAMESPACE.to_string(),
            status_version: STATUS_VERSION_CURRENT,
            close_reason: String::new(),
        }
    }
}

impl Task {
    /// The namespace with the empty-string default applied.
    pub fn namespace_or_default(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.block_reason.is_empty()
    }

    /// Whether `start` may pick this task up.
    pub fn is_startable(&self) -> bool {
        self.status.is_startable() && !self.is_blocked()
    }

    /// Add a label preserving presentation order; duplicates are ignored.
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }
}

/// Branch a task's worktree lives on.
pub fn branch_name(task_id: u64, issue: u64) -> String {
    if issue > 0 {
        format!("crew-{task_id}-issue-{issue}")
    } else {
        format!("crew-{task_id}")
    }
}

/// Worker session name for a task.
pub fn session_name(task_id: u64) -> String {
    format!("crew-{task_id}")
}

/// Reviewer session name for a task.
pub fn review_session_name(task_id: u64) -> String {
    format!("crew-{task_id}-review")
}

/// ACP session name for a task.
pub fn acp_session_name(task_id: u64) -> String {
    format!("crew-{task_id}-acp")
}

/// A comment attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Comment {
    pub text: String,
    /// RFC 3339 UTC.
    pub time: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Comment types accepted by `add_comment`.
pub const VALID_COMMENT_TYPES: &[&str] = &["note", "review", "system"];
