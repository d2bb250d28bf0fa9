//! Configuration type definitions.
//!
//! A `Config` is an immutable value snapshot: use-cases load it once at the
//! top of a call and read the snapshot, never the loader.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which branch a freshly created task is based on when the caller gives no
/// explicit base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NewTaskBase {
    /// The branch currently checked out in the parent repository.
    #[default]
    Current,
    /// The repository's default branch.
    Default,
}

impl NewTaskBase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NewTaskBase::Current => "current",
            NewTaskBase::Default => "default",
        }
    }
}

/// Task-creation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TasksConfig {
    pub new_task_base: NewTaskBase,
    /// Agent bound to `start` when the caller names none.
    pub default_agent: Option<String>,
}

/// One registered agent: an external command-line AI assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Command template. Placeholders: `{{prompt}}`, `{{task_id}}`,
    /// `{{title}}`, `{{description}}`, `{{worktree}}`, `{{base_branch}}`.
    pub command: String,
    /// Prompt template rendered into the task script's heredoc.
    pub prompt: Option<String>,
    /// Reviewer command template; falls back to `command` when unset.
    pub review_command: Option<String>,
    /// Extra environment exported in generated scripts. Keys must match
    /// `^[A-Za-z_][A-Za-z0-9_]*$`.
    pub env: BTreeMap<String, String>,
    /// Shell body run in the worktree after provisioning.
    pub setup_script: Option<String>,
    pub enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            prompt: None,
            review_command: None,
            env: BTreeMap::new(),
            setup_script: None,
            enabled: true,
        }
    }
}

/// Worktree provisioning settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorktreeConfig {
    /// Glob patterns of files copied from the parent repo into a fresh
    /// worktree (untracked seeds like `.env`).
    pub copy_files: Vec<String>,
    /// Shell body run inside the worktree after seeding.
    pub post_create: Option<String>,
}

/// Diff presentation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiffConfig {
    /// External diff tool invoked by the CLI; `git diff` when unset.
    pub tool: Option<String>,
}

/// `complete` gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompleteConfig {
    /// CI gate run in the worktree before review; non-zero aborts.
    pub command: Option<String>,
    /// Maximum review iterations before `complete` fails.
    pub max_reviews: u32,
    /// Anchored against the reviewer's result line to decide success.
    pub review_success_regex: String,
    /// Agent used for review sessions; the task's own agent when unset.
    pub reviewer: Option<String>,
    /// Default for tasks whose `skip_review` is unset.
    pub skip_review: bool,
}

impl Default for CompleteConfig {
    fn default() -> Self {
        Self {
            command: None,
            max_reviews: 3,
            review_success_regex: "LGTM".to_string(),
            reviewer: None,
            skip_review: false,
        }
    }
}

/// The full configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub tasks: TasksConfig,
    pub agents: BTreeMap<String, AgentConfig>,
    pub worktree: WorktreeConfig,
    pub diff: DiffConfig,
    pub complete: CompleteConfig,

    /// Deprecated: pre-0.3 spelling of `tasks.new_task_base`. Read and
    /// honoured with a warning; never written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<NewTaskBase>,
}

impl Config {
    /// Look up an agent by name, distinguishing "not found" from "disabled".
    pub fn agent(&self, name: &str) -> Result<&AgentConfig, AgentLookupError> {
        match self.agents.get(name) {
            None => Err(AgentLookupError::NotFound {
                name: name.to_string(),
            }),
            Some(agent) if !agent.enabled => Err(AgentLookupError::Disabled {
                name: name.to_string(),
            }),
            Some(agent) => Ok(agent),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AgentLookupError {
    #[error("agent '{name}' not found in the agent registry")]
    NotFound { name: String },

    #[error("agent '{name}' is disabled")]
    Disabled { name: String },
}
