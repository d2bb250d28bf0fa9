//! tmux-backed session manager.
//!
//! All production `tmux` invocations live here. Each call validates the
//! session name, logs structured events, and maps tmux stderr to the
//! session error taxonomy. Sessions are exact-matched (`-t =name`) so a
//! `crew-1` operation can never hit `crew-11`.

use std::process::Output;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::clock::{Clock, format_rfc3339};
use crate::render::shell_quote;

use super::errors::SessionError;
use super::log::write_log_header;
use super::types::{SessionRecord, StartOptions};

/// Named detachable terminal sessions.
pub trait SessionManager: Send + Sync {
    /// Start a detached session running `options.command`, with its output
    /// appended to the session log (after the log header is written).
    fn start(&self, options: &StartOptions) -> Result<SessionRecord, SessionError>;
    fn stop(&self, name: &str) -> Result<(), SessionError>;
    fn is_running(&self, name: &str) -> Result<bool, SessionError>;
    /// Snapshot of the last `lines` lines of rendered output.
    fn peek(&self, name: &str, lines: u32, with_escapes: bool) -> Result<String, SessionError>;
    /// Block until the session ends or the token cancels. Cancellation
    /// returns `WaitCancelled` and leaves the session running; callers that
    /// want it gone must issue `stop`.
    fn wait(&self, token: &CancelToken, name: &str) -> Result<(), SessionError>;
    /// Inject keystrokes, including tmux key tokens like `"Enter"`.
    fn send(&self, name: &str, keys: &[&str]) -> Result<(), SessionError>;
}

fn session_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap())
}

fn validate_session_name(name: &str) -> Result<(), SessionError> {
    if session_name_re().is_match(name) {
        Ok(())
    } else {
        Err(SessionError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// Production session manager driving the external `tmux` binary.
pub struct TmuxSessionManager {
    clock: std::sync::Arc<dyn Clock>,
}

impl TmuxSessionManager {
    pub fn new(clock: std::sync::Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn run_tmux(&self, args: &[&str]) -> Result<Output, SessionError> {
        std::process::Command::new("tmux")
            .args(args)
            .output()
            .map_err(|e| SessionError::TmuxFailed {
                message: format!("failed to execute tmux {}: {e}", args.join(" ")),
            })
    }
}

fn stderr_means_no_session(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("can't find session")
        || stderr.contains("no server running")
        || stderr.contains("error connecting to")
}

impl SessionManager for TmuxSessionManager {
    fn start(&self, options: &StartOptions) -> Result<SessionRecord, SessionError> {
        validate_session_name(&options.name)?;
        if self.is_running(&options.name)? {
            return Err(SessionError::SessionRunning {
                name: options.name.clone(),
            });
        }

        let started_at = format_rfc3339(self.clock.now());
        write_log_header(
            &options.log_path,
            &options.name,
            &started_at,
            &options.working_dir,
            &options.command,
        )?;
        let log_offset = super::log::log_len(&options.log_path);

        // Fold stderr into stdout and append everything to the session log
        // the header was just written to.
        let wrapped = format!(
            "{{ {}; }} 2>&1 | tee -a {}",
            options.command,
            shell_quote(&options.log_path.to_string_lossy())
        );

        info!(
            event = "core.session.start_started",
            name = %options.name,
            session_type = %options.session_type,
            working_dir = %options.working_dir.display(),
        );

        let dir = options.working_dir.to_string_lossy().to_string();
        let output = self.run_tmux(&[
            "new-session",
            "-d",
            "-s",
            &options.name,
            "-c",
            &dir,
            &wrapped,
        ])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::TmuxFailed {
                message: format!("tmux new-session failed: {}", stderr.trim()),
            });
        }

        info!(event = "core.session.start_completed", name = %options.name);
        Ok(SessionRecord {
            name: options.name.clone(),
            working_dir: options.working_dir.clone(),
            command: options.command.clone(),
            started_at,
            session_type: options.session_type,
            log_offset,
            task: options.task.clone(),
        })
    }

    fn stop(&self, name: &str) -> Result<(), SessionError> {
        validate_session_name(name)?;
        let target = format!("={name}");
        let output = self.run_tmux(&["kill-session", "-t", &target])?;

        if output.status.success() {
            info!(event = "core.session.stop_completed", name = name);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr_means_no_session(&stderr) {
            return Err(SessionError::NoSession {
                name: name.to_string(),
            });
        }
        Err(SessionError::TmuxFailed {
            message: format!("tmux kill-session failed: {}", stderr.trim()),
        })
    }

    fn is_running(&self, name: &str) -> Result<bool, SessionError> {
        validate_session_name(name)?;
        let target = format!("={name}");
        let output = self.run_tmux(&["has-session", "-t", &target])?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr_means_no_session(&stderr) || output.status.code() == Some(1) {
            return Ok(false);
        }
        Err(SessionError::TmuxFailed {
            message: format!("tmux has-session failed: {}", stderr.trim()),
        })
    }

    fn peek(&self, name: &str, lines: u32, with_escapes: bool) -> Result<String, SessionError> {
        validate_session_name(name)?;
        if !self.is_running(name)? {
            return Err(SessionError::NoSession {
                name: name.to_string(),
            });
        }

        let target = format!("={name}");
        let start = format!("-{lines}");
        let mut args = vec!["capture-pane", "-p"];
        if with_escapes {
            args.push("-e");
        }
        args.extend_from_slice(&["-t", &target, "-S", &start]);

        let output = self.run_tmux(&args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr_means_no_session(&stderr) {
                return Err(SessionError::NoSession {
                    name: name.to_string(),
                });
            }
            return Err(SessionError::TmuxFailed {
                message: format!("tmux capture-pane failed: {}", stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn wait(&self, token: &CancelToken, name: &str) -> Result<(), SessionError> {
        validate_session_name(name)?;
        debug!(event = "core.session.wait_started", name = name);

        loop {
            if !self.is_running(name)? {
                debug!(event = "core.session.wait_completed", name = name);
                return Ok(());
            }
            if !token.sleep(Duration::from_secs(1)) {
                warn!(event = "core.session.wait_cancelled", name = name);
                return Err(SessionError::WaitCancelled {
                    name: name.to_string(),
                });
            }
        }
    }

    fn send(&self, name: &str, keys: &[&str]) -> Result<(), SessionError> {
        validate_session_name(name)?;
        let target = format!("={name}");
        let mut args = vec!["send-keys", "-t", &target];
        args.extend_from_slice(keys);

        let output = self.run_tmux(&args)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr_means_no_session(&stderr) {
            return Err(SessionError::NoSession {
                name: name.to_string(),
            });
        }
        Err(SessionError::TmuxFailed {
            message: format!("tmux send-keys failed: {}", stderr.trim()),
        })
    }
}
