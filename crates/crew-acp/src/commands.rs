//! Commands carried on the per-task IPC channel.

use serde::{Deserialize, Serialize};

/// A control command for a running ACP session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcpCommand {
    Prompt { text: String },
    Permission { option_id: String },
    Cancel,
    Stop,
}

impl AcpCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            AcpCommand::Prompt { .. } => "prompt",
            AcpCommand::Permission { .. } => "permission",
            AcpCommand::Cancel => "cancel",
            AcpCommand::Stop => "stop",
        }
    }
}
