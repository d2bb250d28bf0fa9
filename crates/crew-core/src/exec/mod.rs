//! Shell command execution.
//!
//! All production `sh -c` invocations in crew-core go through these
//! adapters so use-cases stay mockable and every execution is logged
//! consistently.

pub mod errors;

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
pub use errors::ExecError;

/// A shell command plus its execution context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellCommand {
    pub command: String,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            dir: None,
            env: Vec::new(),
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

/// Exit code and combined stdout/stderr of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes shell commands, capturing exit code and combined output.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, cmd: &ShellCommand) -> Result<CommandOutput, ExecError>;

    /// Like `execute`, but polls the token and kills the child on
    /// cancellation.
    fn execute_with_cancel(
        &self,
        token: &CancelToken,
        cmd: &ShellCommand,
    ) -> Result<CommandOutput, ExecError>;
}

/// Runs agent setup hooks and worktree post-create hooks.
pub trait ScriptRunner: Send + Sync {
    /// Run a shell body in `dir`, returning its exit code and combined
    /// output.
    fn run(&self, dir: &std::path::Path, body: &str) -> Result<CommandOutput, ExecError>;
}

/// Production executor: `sh -c <command>` with stderr folded into stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    fn spawn(&self, cmd: &ShellCommand) -> Result<std::process::Child, ExecError> {
        debug!(
            event = "core.exec.spawn",
            command = %cmd.command,
            dir = ?cmd.dir,
        );

        let mut command = Command::new("sh");
        command
            .arg("-c")
            // Fold stderr into stdout inside the shell so ordering is
            // preserved by the single pipe.
            .arg(format!("{{ {} ; }} 2>&1", cmd.command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(ref dir) = cmd.dir {
            command.current_dir(dir);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        command.spawn().map_err(|e| ExecError::SpawnFailed { source: e })
    }
}

impl CommandExecutor for ShellExecutor {
    fn execute(&self, cmd: &ShellCommand) -> Result<CommandOutput, ExecError> {
        let mut child = self.spawn(cmd)?;
        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_string(&mut output)?;
        }
        let status = child.wait()?;
        let exit_code = status.code().unwrap_or(-1);

        info!(
            event = "core.exec.completed",
            command = %cmd.command,
            exit_code = exit_code,
        );
        Ok(CommandOutput { exit_code, output })
    }

    fn execute_with_cancel(
        &self,
        token: &CancelToken,
        cmd: &ShellCommand,
    ) -> Result<CommandOutput, ExecError> {
        if token.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let mut child = self.spawn(cmd)?;

        // Drain stdout on a helper thread; the pipe closes when the child
        // exits or is killed, unblocking the read.
        let stdout = child.stdout.take();
        let reader = std::thread::spawn(move || {
            let mut output = String::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_string(&mut output);
            }
            output
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if token.is_cancelled() {
                if let Err(e) = child.kill() {
                    warn!(
                        event = "core.exec.kill_failed",
                        command = %cmd.command,
                        error = %e,
                    );
                }
                let _ = child.wait();
                let _ = reader.join();
                return Err(ExecError::Cancelled);
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        let output = reader.join().unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);
        info!(
            event = "core.exec.completed",
            command = %cmd.command,
            exit_code = exit_code,
        );
        Ok(CommandOutput { exit_code, output })
    }
}

impl ScriptRunner for ShellExecutor {
    fn run(&self, dir: &std::path::Path, body: &str) -> Result<CommandOutput, ExecError> {
        self.execute(&ShellCommand::new(body).in_dir(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_captures_output_and_exit_code() {
        let result = ShellExecutor
            .execute(&ShellCommand::new("echo hello"))
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.success());
        assert_eq!(result.output.trim(), "hello");
    }

    #[test]
    fn test_execute_combines_stderr() {
        let result = ShellExecutor
            .execute(&ShellCommand::new("echo out; echo err >&2"))
            .unwrap();
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[test]
    fn test_execute_nonzero_exit() {
        let result = ShellExecutor.execute(&ShellCommand::new("exit 3")).unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[test]
    fn test_execute_in_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = ShellExecutor
            .execute(&ShellCommand::new("pwd").in_dir(tmp.path()))
            .unwrap();
        let reported = std::path::PathBuf::from(result.output.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_execute_with_env() {
        let mut cmd = ShellCommand::new("printf '%s' \"$CREW_TEST_VAR\"");
        cmd.env.push(("CREW_TEST_VAR".to_string(), "42".to_string()));
        let result = ShellExecutor.execute(&cmd).unwrap();
        assert_eq!(result.output, "42");
    }

    #[test]
    fn test_execute_with_cancel_kills_child() {
        let token = CancelToken::new();
        let background = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            background.cancel();
        });

        let start = std::time::Instant::now();
        let result = ShellExecutor.execute_with_cancel(&token, &ShellCommand::new("sleep 30"));
        assert!(matches!(result, Err(ExecError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_execute_with_cancel_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let result = ShellExecutor.execute_with_cancel(&token, &ShellCommand::new("echo hi"));
        assert!(matches!(result, Err(ExecError::Cancelled)));
    }

    #[test]
    fn test_script_runner_runs_in_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = ShellExecutor.run(tmp.path(), "touch marker && echo done").unwrap();
        assert!(result.success());
        assert!(tmp.path().join("marker").exists());
    }
}
