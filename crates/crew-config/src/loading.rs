//! Configuration loading and merging logic.
//!
//! # Configuration hierarchy
//!
//! Configuration is loaded in the following order (later sources override
//! earlier ones):
//! 1. **Hardcoded defaults** - built-in fallback values
//! 2. **User config** - `~/.config/crew/config.toml`
//! 3. **Repo config** - `<repo>/.crew/config.toml`
//!
//! Missing files are not errors; parse errors are.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::ConfigError;
use crate::types::Config;
use crate::validation::validate_config;

/// Options for `load_with_options`.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Repository root whose `.crew/config.toml` participates in the merge.
    /// `None` skips the repo layer.
    pub repo_root: Option<PathBuf>,
    /// Skip the user layer (used by tests and `--no-user-config`).
    pub skip_user: bool,
}

/// Path of the user-level config file.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("crew").join("config.toml"))
}

/// Path of the repo-level config file.
pub fn repo_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".crew").join("config.toml")
}

/// Load the merged configuration for a repository.
pub fn load(repo_root: &Path) -> Result<Config, ConfigError> {
    load_with_options(&LoadOptions {
        repo_root: Some(repo_root.to_path_buf()),
        skip_user: false,
    })
}

/// Load only the user-level configuration merged over defaults.
pub fn load_global() -> Result<Config, ConfigError> {
    load_with_options(&LoadOptions {
        repo_root: None,
        skip_user: false,
    })
}

/// Load only the repo-level configuration merged over defaults.
pub fn load_repo(repo_root: &Path) -> Result<Config, ConfigError> {
    load_with_options(&LoadOptions {
        repo_root: Some(repo_root.to_path_buf()),
        skip_user: true,
    })
}

/// Load configuration according to `options`, validate, and apply
/// deprecation fallbacks.
pub fn load_with_options(options: &LoadOptions) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    if !options.skip_user
        && let Some(path) = user_config_path()
        && let Some(user_config) = load_config_file(&path)?
    {
        config = merge_configs(config, user_config);
    }

    if let Some(ref repo_root) = options.repo_root
        && let Some(repo_config) = load_config_file(&repo_config_path(repo_root))?
    {
        config = merge_configs(config, repo_config);
    }

    config = apply_deprecations(config);
    validate_config(&config)?;

    Ok(config)
}

/// Write a starter config file. Fails when one already exists.
pub fn write_default(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Err(ConfigError::ConfigExists {
            path: path.display().to_string(),
        });
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(&Config::default())
        .map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;
    std::fs::write(path, rendered)?;
    Ok(())
}

/// Load a configuration file. `Ok(None)` when the file does not exist.
fn load_config_file(path: &Path) -> Result<Option<Config>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::ReadFailed {
                path: path.display().to_string(),
                source: e,
            });
        }
    };

    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(Some(config))
}

/// Merge two configurations, with `override_config` taking precedence.
///
/// Optional fields replace base values only when present; the agents map is
/// merged key-wise with override entries winning.
pub fn merge_configs(base: Config, override_config: Config) -> Config {
    Config {
        tasks: crate::types::TasksConfig {
            new_task_base: override_config.tasks.new_task_base,
            default_agent: override_config
                .tasks
                .default_agent
                .or(base.tasks.default_agent),
        },
        agents: {
            let mut merged = base.agents;
            for (key, value) in override_config.agents {
                merged.insert(key, value);
            }
            merged
        },
        worktree: crate::types::WorktreeConfig {
            copy_files: if override_config.worktree.copy_files.is_empty() {
                base.worktree.copy_files
            } else {
                override_config.worktree.copy_files
            },
            post_create: override_config
                .worktree
                .post_create
                .or(base.worktree.post_create),
        },
        diff: crate::types::DiffConfig {
            tool: override_config.diff.tool.or(base.diff.tool),
        },
        complete: crate::types::CompleteConfig {
            command: override_config.complete.command.or(base.complete.command),
            max_reviews: override_config.complete.max_reviews,
            review_success_regex: override_config.complete.review_success_regex,
            reviewer: override_config.complete.reviewer.or(base.complete.reviewer),
            skip_review: override_config.complete.skip_review || base.complete.skip_review,
        },
        base: override_config.base.or(base.base),
    }
}

/// Honour deprecated fields with a warning.
fn apply_deprecations(mut config: Config) -> Config {
    if let Some(base) = config.base.take() {
        warn!(
            event = "config.deprecated_field",
            field = "base",
            replacement = "tasks.new_task_base",
            "Config field 'base' is deprecated, use 'tasks.new_task_base'"
        );
        config.tasks.new_task_base = base;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentConfig, NewTaskBase};

    fn write_repo_config(dir: &Path, content: &str) {
        let crew_dir = dir.join(".crew");
        std::fs::create_dir_all(&crew_dir).unwrap();
        std::fs::write(crew_dir.join("config.toml"), content).unwrap();
    }

    #[test]
    fn test_load_missing_files_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_with_options(&LoadOptions {
            repo_root: Some(tmp.path().to_path_buf()),
            skip_user: true,
        })
        .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_repo_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_repo_config(
            tmp.path(),
            r#"
            [tasks]
            new_task_base = "default"

            [agents.claude]
            command = "claude -p '{{prompt}}'"
            "#,
        );

        let config = load_repo(tmp.path()).unwrap();
        assert_eq!(config.tasks.new_task_base, NewTaskBase::Default);
        assert!(config.agents.contains_key("claude"));
    }

    #[test]
    fn test_load_parse_error_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_repo_config(tmp.path(), "not [valid toml");

        let result = load_repo(tmp.path());
        assert!(matches!(result, Err(ConfigError::ParseFailed { .. })));
    }

    #[test]
    fn test_merge_agents_key_wise() {
        let mut base = Config::default();
        base.agents.insert(
            "claude".to_string(),
            AgentConfig {
                command: "claude-base".to_string(),
                ..AgentConfig::default()
            },
        );
        base.agents.insert(
            "codex".to_string(),
            AgentConfig {
                command: "codex".to_string(),
                ..AgentConfig::default()
            },
        );

        let mut overlay = Config::default();
        overlay.agents.insert(
            "claude".to_string(),
            AgentConfig {
                command: "claude-override".to_string(),
                ..AgentConfig::default()
            },
        );

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.agents.get("claude").unwrap().command, "claude-override");
        assert_eq!(merged.agents.get("codex").unwrap().command, "codex");
    }

    #[test]
    fn test_merge_optionals_prefer_override() {
        let mut base = Config::default();
        base.complete.command = Some("cargo test".to_string());
        base.worktree.post_create = Some("base-hook".to_string());

        let mut overlay = Config::default();
        overlay.worktree.post_create = Some("overlay-hook".to_string());

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.complete.command.as_deref(), Some("cargo test"));
        assert_eq!(merged.worktree.post_create.as_deref(), Some("overlay-hook"));
    }

    #[test]
    fn test_deprecated_base_field_honoured() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_repo_config(tmp.path(), r#"base = "default""#);

        let config = load_repo(tmp.path()).unwrap();
        assert_eq!(config.tasks.new_task_base, NewTaskBase::Default);
        assert!(config.base.is_none());
    }

    #[test]
    fn test_write_default_refuses_to_overwrite() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(".crew").join("config.toml");

        write_default(&path).unwrap();
        assert!(path.exists());

        let second = write_default(&path);
        assert!(matches!(second, Err(ConfigError::ConfigExists { .. })));
    }

    #[test]
    fn test_repo_config_path() {
        assert_eq!(
            repo_config_path(Path::new("/my/repo")),
            PathBuf::from("/my/repo/.crew/config.toml")
        );
    }
}
