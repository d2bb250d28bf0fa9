//! Session data structures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What kind of work a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Worker,
    Reviewer,
    Acp,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Worker => "worker",
            SessionType::Reviewer => "reviewer",
            SessionType::Acp => "acp",
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task identity carried on a session for display purposes. The session
/// manager never reaches back into the task store; callers pass what they
/// want recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionTask {
    pub id: u64,
    pub title: String,
    pub agent: String,
}

/// Parameters for `SessionManager::start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub name: String,
    pub working_dir: PathBuf,
    /// Command run inside the session; its stdout/stderr are appended to
    /// the session log.
    pub command: String,
    pub log_path: PathBuf,
    pub session_type: SessionType,
    pub task: Option<SessionTask>,
}

/// A started session as the manager reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub name: String,
    pub working_dir: PathBuf,
    pub command: String,
    /// RFC 3339 UTC.
    pub started_at: String,
    pub session_type: SessionType,
    /// Length of the session log right after the header was written;
    /// everything past it is this run's output.
    pub log_offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<SessionTask>,
}
