//! Poller: block until a task reaches an expected or terminal status,
//! invoking a command on every observed change.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::exec::{CommandExecutor, ShellCommand};
use crate::lifecycle::{Deps, LifecycleError};
use crate::render::render_template;
use crate::tasks::TaskStatus;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Default)]
pub struct PollInput {
    pub task_id: u64,
    pub namespace: String,
    /// Seconds between observations; 0 means the default of 10.
    pub interval_secs: u64,
    /// Overall deadline; `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
    /// When non-empty, polling also ends once the status has moved out of
    /// this set.
    pub expected_statuses: Vec<TaskStatus>,
    /// Rendered with `{{task_id}}`, `{{old_status}}`, `{{new_status}}` and
    /// executed on every observed change and on terminal reach.
    pub command_template: Option<String>,
}

/// Why the poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStop {
    Terminal,
    LeftExpectedSet,
    StatusChanged,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PollOutput {
    pub stop: PollStop,
    pub last_status: TaskStatus,
}

pub fn poll_task(
    deps: &Deps,
    token: &CancelToken,
    input: &PollInput,
) -> Result<PollOutput, LifecycleError> {
    let interval = Duration::from_secs(if input.interval_secs == 0 {
        DEFAULT_POLL_INTERVAL_SECS
    } else {
        input.interval_secs
    });
    let deadline = input.timeout_secs.map(Duration::from_secs);
    let started = std::time::Instant::now();

    let mut previous: Option<TaskStatus> = None;

    loop {
        if token.is_cancelled() {
            // A user abort is a clean exit, not an error.
            return Ok(PollOutput {
                stop: PollStop::Cancelled,
                last_status: previous.unwrap_or(TaskStatus::Todo),
            });
        }

        let task = deps.get_task(&input.namespace, input.task_id)?;
        let status = task.status;

        if let Some(prev) = previous
            && status != prev
        {
            run_on_change(deps, input, prev, status);
            info!(
                event = "core.poll.status_changed",
                task_id = input.task_id,
                old_status = %prev,
                new_status = %status,
            );
            return Ok(PollOutput {
                stop: PollStop::StatusChanged,
                last_status: status,
            });
        }

        if status.is_terminal() {
            if previous.is_none() {
                run_on_change(deps, input, status, status);
            }
            return Ok(PollOutput {
                stop: PollStop::Terminal,
                last_status: status,
            });
        }

        if !input.expected_statuses.is_empty() && !input.expected_statuses.contains(&status) {
            return Ok(PollOutput {
                stop: PollStop::LeftExpectedSet,
                last_status: status,
            });
        }

        previous = Some(status);

        if let Some(deadline) = deadline
            && started.elapsed() >= deadline
        {
            return Ok(PollOutput {
                stop: PollStop::TimedOut,
                last_status: status,
            });
        }

        if !token.sleep(interval) {
            return Ok(PollOutput {
                stop: PollStop::Cancelled,
                last_status: status,
            });
        }
    }
}

fn run_on_change(deps: &Deps, input: &PollInput, old: TaskStatus, new: TaskStatus) {
    let Some(ref template) = input.command_template else {
        return;
    };

    let mut values = BTreeMap::new();
    values.insert("task_id", input.task_id.to_string());
    values.insert("old_status", old.to_string());
    values.insert("new_status", new.to_string());
    let command = render_template(template, &values);

    match deps.executor.execute(&ShellCommand::new(command.clone())) {
        Ok(result) => {
            if !result.output.is_empty() {
                print!("{}", result.output);
            }
            if !result.success() {
                warn!(
                    event = "core.poll.command_failed",
                    command = %command,
                    exit_code = result.exit_code,
                );
            }
        }
        Err(e) => {
            warn!(
                event = "core.poll.command_error",
                command = %command,
                error = %e,
            );
        }
    }
}
