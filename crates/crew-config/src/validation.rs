//! Post-merge configuration validation.

use crate::errors::ConfigError;
use crate::types::Config;

/// Validate the merged configuration snapshot.
///
/// Runs after merging so partial layers can rely on other layers filling
/// gaps; only the final view has to be coherent.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    for (name, agent) in &config.agents {
        if agent.command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("agent '{name}' has an empty command"),
            });
        }
    }

    if let Some(ref default_agent) = config.tasks.default_agent
        && !config.agents.contains_key(default_agent)
    {
        return Err(ConfigError::Invalid {
            message: format!("tasks.default_agent '{default_agent}' is not a registered agent"),
        });
    }

    if config.complete.max_reviews == 0 {
        return Err(ConfigError::Invalid {
            message: "complete.max_reviews must be at least 1".to_string(),
        });
    }

    if let Err(e) = regex::Regex::new(&config.complete.review_success_regex) {
        return Err(ConfigError::Invalid {
            message: format!("complete.review_success_regex does not compile: {e}"),
        });
    }

    if let Some(ref reviewer) = config.complete.reviewer
        && !config.agents.contains_key(reviewer)
    {
        return Err(ConfigError::Invalid {
            message: format!("complete.reviewer '{reviewer}' is not a registered agent"),
        });
    }

    Ok(())
}
