//! Generated session scripts.
//!
//! `start` materialises one executable script per task under
//! `<crew_dir>/scripts/`. The script exports the agent's environment,
//! embeds the rendered prompt as a heredoc, installs traps that report the
//! exit code back through the `_session-ended` callback, and finally runs
//! the agent command.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use super::errors::SessionError;

/// Shell variable the rendered prompt is exported as.
pub const PROMPT_VAR: &str = "CREW_PROMPT";

const PROMPT_HEREDOC_TAG: &str = "CREW_PROMPT_EOF";

fn env_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// Validate an environment variable name for script export.
pub fn validate_env_name(name: &str) -> Result<(), SessionError> {
    if env_name_re().is_match(name) {
        Ok(())
    } else {
        Err(SessionError::InvalidEnvVarName {
            name: name.to_string(),
        })
    }
}

/// Render sorted `export KEY='value'` lines. Keys are validated; values are
/// single-quote escaped.
pub fn render_env_exports(env: &BTreeMap<String, String>) -> Result<String, SessionError> {
    let mut out = String::new();
    for (key, value) in env {
        validate_env_name(key)?;
        out.push_str(&format!("export {key}={}\n", crate::render::shell_quote(value)));
    }
    Ok(out)
}

/// Render the prompt heredoc assignment.
pub fn render_prompt_heredoc(prompt: &str) -> String {
    format!(
        "{PROMPT_VAR}=$(cat <<'{PROMPT_HEREDOC_TAG}'\n{prompt}\n{PROMPT_HEREDOC_TAG}\n)\nexport {PROMPT_VAR}\n"
    )
}

/// Render the trap block that reports session exit codes.
///
/// Signals are translated to conventional exit codes (INT 130, TERM 143,
/// HUP 129) before the EXIT trap fires the callback with `$?`.
fn render_traps(crew_bin: &str, task_id: u64) -> String {
    format!(
        "on_exit() {{\n  code=$?\n  trap - EXIT\n  {crew_bin} _session-ended --task {task_id} --exit-code \"$code\" || true\n}}\ntrap on_exit EXIT\ntrap 'exit 130' INT\ntrap 'exit 143' TERM\ntrap 'exit 129' HUP\n"
    )
}

/// Build the worker task script body.
pub fn build_task_script(
    task_id: u64,
    env: &BTreeMap<String, String>,
    prompt: &str,
    agent_command: &str,
    crew_bin: &str,
) -> Result<String, SessionError> {
    let mut script = String::new();
    script.push_str("#!/usr/bin/env bash\n");
    script.push_str("set -u\n\n");
    let exports = render_env_exports(env)?;
    if !exports.is_empty() {
        script.push_str(&exports);
        script.push('\n');
    }
    script.push_str(&render_prompt_heredoc(prompt));
    script.push('\n');
    script.push_str(&render_traps(crew_bin, task_id));
    script.push('\n');
    script.push_str(agent_command);
    script.push('\n');
    Ok(script)
}

/// Build the ACP spawn-record script body. The runtime spawns the command
/// itself with piped stdio; the script exists so operators can inspect or
/// replay the exact invocation.
pub fn build_acp_script(
    env: &BTreeMap<String, String>,
    agent_command: &str,
) -> Result<String, SessionError> {
    let mut script = String::new();
    script.push_str("#!/usr/bin/env bash\n");
    script.push_str("set -u\n\n");
    let exports = render_env_exports(env)?;
    if !exports.is_empty() {
        script.push_str(&exports);
        script.push('\n');
    }
    script.push_str("exec ");
    script.push_str(agent_command);
    script.push('\n');
    Ok(script)
}

/// Write a script file with owner-only execute permissions.
pub fn write_script(path: &Path, content: &str) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Remove a script file; missing files are fine.
pub fn remove_script(path: &Path) -> Result<(), SessionError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SessionError::IoError { source: e }),
    }
}
