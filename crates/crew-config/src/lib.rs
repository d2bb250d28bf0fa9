//! crew-config: configuration loading and the agent registry.
//!
//! A [`Config`] is an immutable snapshot merged from defaults, the user
//! config, and the repo config. Use-cases take the snapshot once at the top
//! of a call.

pub mod errors;
pub mod loading;
pub mod types;
pub mod validation;

pub use errors::ConfigError;
pub use loading::{
    LoadOptions, load, load_global, load_repo, load_with_options, merge_configs, repo_config_path,
    user_config_path, write_default,
};
pub use types::{
    AgentConfig, AgentLookupError, CompleteConfig, Config, DiffConfig, NewTaskBase, TasksConfig,
    WorktreeConfig,
};
pub use validation::validate_config;
