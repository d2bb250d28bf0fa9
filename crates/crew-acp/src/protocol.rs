//! ACP message shapes the runtime exchanges with an agent.

use serde::{Deserialize, Serialize};

/// Protocol version sent in `initialize`.
pub const PROTOCOL_VERSION: u32 = 1;

// Requests the runtime sends.
pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_SESSION_NEW: &str = "session/new";
pub const METHOD_SESSION_PROMPT: &str = "session/prompt";
// Notification the runtime sends.
pub const METHOD_SESSION_CANCEL: &str = "session/cancel";

// Agent-to-client traffic.
pub const METHOD_SESSION_UPDATE: &str = "session/update";
pub const METHOD_REQUEST_PERMISSION: &str = "session/request_permission";

/// Agent-to-client methods answered with `MethodNotFound`: the runtime
/// offers no filesystem or terminal capability.
pub const UNSUPPORTED_CLIENT_METHODS: &[&str] = &[
    "fs/read_text_file",
    "fs/write_text_file",
    "terminal/create",
    "terminal/output",
    "terminal/release",
    "terminal/wait_for_exit",
    "terminal/kill",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsCapabilities {
    pub read_text_file: bool,
    pub write_text_file: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCapabilities {
    pub fs: FsCapabilities,
    pub terminal: bool,
}

impl ClientCapabilities {
    /// The fixed capability set: no fs, no terminal.
    pub fn none() -> Self {
        Self {
            fs: FsCapabilities {
                read_text_file: false,
                write_text_file: false,
            },
            terminal: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeParams {
    pub protocol_version: u32,
    pub client_capabilities: ClientCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct InitializeResult {
    pub protocol_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewSessionParams {
    pub cwd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewSessionResult {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptParams {
    pub session_id: String,
    pub prompt: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    Refusal,
    Cancelled,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptResult {
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelParams {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionOption {
    pub option_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestPermissionParams {
    #[serde(default)]
    pub session_id: String,
    pub options: Vec<PermissionOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    Selected { option_id: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestPermissionResult {
    pub outcome: PermissionOutcome,
}

/// `session/update` payload. The update kinds mirror what agents stream;
/// anything unrecognised is kept raw so the event log never drops data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionUpdateParams {
    #[serde(default)]
    pub session_id: String,
    pub update: SessionUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "session_update", rename_all = "snake_case")]
pub enum SessionUpdate {
    AgentMessageChunk { content: ContentBlock },
    AgentThoughtChunk { content: ContentBlock },
    ToolCall(serde_json::Value),
    ToolCallUpdate(serde_json::Value),
    UserMessageChunk { content: ContentBlock },
    Plan(serde_json::Value),
    CurrentModeUpdate(serde_json::Value),
    AvailableCommandsUpdate(serde_json::Value),
}

impl SessionUpdate {
    /// Event-log type tag for this update kind.
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionUpdate::AgentMessageChunk { .. } => "agent_message_chunk",
            SessionUpdate::AgentThoughtChunk { .. } => "agent_thought_chunk",
            SessionUpdate::ToolCall(_) => "tool_call",
            SessionUpdate::ToolCallUpdate(_) => "tool_call_update",
            SessionUpdate::UserMessageChunk { .. } => "user_message_chunk",
            SessionUpdate::Plan(_) => "plan",
            SessionUpdate::CurrentModeUpdate(_) => "current_mode_update",
            SessionUpdate::AvailableCommandsUpdate(_) => "available_commands_update",
        }
    }

    /// Text an interactive caller wants echoed to stdout.
    pub fn display_text(&self) -> Option<&str> {
        match self {
            SessionUpdate::AgentMessageChunk {
                content: ContentBlock::Text { text },
            } => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_params_shape() {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION,
            client_capabilities: ClientCapabilities::none(),
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["protocol_version"], 1);
        assert_eq!(json["client_capabilities"]["fs"]["read_text_file"], false);
        assert_eq!(json["client_capabilities"]["fs"]["write_text_file"], false);
        assert_eq!(json["client_capabilities"]["terminal"], false);
    }

    #[test]
    fn test_prompt_params_single_text_block() {
        let params = PromptParams {
            session_id: "sess-1".to_string(),
            prompt: vec![ContentBlock::Text {
                text: "hello".to_string(),
            }],
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["prompt"][0]["type"], "text");
        assert_eq!(json["prompt"][0]["text"], "hello");
    }

    #[test]
    fn test_stop_reason_parsing() {
        let result: PromptResult =
            serde_json::from_str(r#"{"stop_reason":"end_turn"}"#).unwrap();
        assert_eq!(result.stop_reason, StopReason::EndTurn);

        let unknown: PromptResult =
            serde_json::from_str(r#"{"stop_reason":"something_new"}"#).unwrap();
        assert_eq!(unknown.stop_reason, StopReason::Other);
    }

    #[test]
    fn test_permission_outcome_shapes() {
        let selected = RequestPermissionResult {
            outcome: PermissionOutcome::Selected {
                option_id: "allow".to_string(),
            },
        };
        let json = serde_json::to_value(&selected).unwrap();
        assert_eq!(json["outcome"]["outcome"], "selected");
        assert_eq!(json["outcome"]["option_id"], "allow");

        let cancelled = RequestPermissionResult {
            outcome: PermissionOutcome::Cancelled,
        };
        let json = serde_json::to_value(&cancelled).unwrap();
        assert_eq!(json["outcome"]["outcome"], "cancelled");
    }

    #[test]
    fn test_session_update_classification() {
        let update: SessionUpdateParams = serde_json::from_str(
            r#"{"session_id":"s","update":{"session_update":"agent_message_chunk","content":{"type":"text","text":"hi"}}}"#,
        )
        .unwrap();
        assert_eq!(update.update.event_type(), "agent_message_chunk");
        assert_eq!(update.update.display_text(), Some("hi"));

        let tool: SessionUpdateParams = serde_json::from_str(
            r#"{"session_id":"s","update":{"session_update":"tool_call","title":"run tests"}}"#,
        )
        .unwrap();
        assert_eq!(tool.update.event_type(), "tool_call");
        assert_eq!(tool.update.display_text(), None);
    }

    #[test]
    fn test_unsupported_method_list_covers_fs_and_terminal() {
        assert!(UNSUPPORTED_CLIENT_METHODS.contains(&"fs/read_text_file"));
        assert!(UNSUPPORTED_CLIENT_METHODS.contains(&"terminal/kill"));
        assert_eq!(UNSUPPORTED_CLIENT_METHODS.len(), 7);
    }
}
