//! `_session-ended` callback: the generated script's EXIT trap reports the
//! agent's exit code here.

use tracing::info;

use crate::sessions::script::remove_script;
use crate::tasks::{Task, TaskStatus, TaskStore};

use super::deps::Deps;
use super::errors::LifecycleError;

#[derive(Debug, Clone, Default)]
pub struct SessionEndedInput {
    pub task_id: u64,
    pub namespace: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct SessionEndedOutput {
    /// True when the call changed nothing (double-fire, or a status the
    /// callback does not act on).
    pub ignored: bool,
    pub task: Task,
}

pub fn session_ended(
    deps: &Deps,
    input: &SessionEndedInput,
) -> Result<SessionEndedOutput, LifecycleError> {
    let mut task = deps.get_task(&input.namespace, input.task_id)?;

    // Double-fire: a previous callback already unbound the session.
    if task.agent.is_empty() && task.session.is_empty() {
        info!(
            event = "core.lifecycle.session_ended_ignored",
            task_id = task.id,
            exit_code = input.exit_code,
        );
        return Ok(SessionEndedOutput {
            ignored: true,
            task,
        });
    }

    let changed = if task.status == TaskStatus::InProgress {
        if input.exit_code == 0 {
            // Keep the session binding so a follow-up review can reuse the
            // agent's context.
            task.status = TaskStatus::InReview;
        } else {
            task.status = TaskStatus::Error;
            task.agent.clear();
            task.session.clear();
        }
        true
    } else {
        false
    };

    if changed {
        deps.store.save(&task)?;
        info!(
            event = "core.lifecycle.session_ended",
            task_id = task.id,
            exit_code = input.exit_code,
            status = %task.status,
        );
    }

    remove_script(&deps.paths.task_script(task.id))?;

    Ok(SessionEndedOutput {
        ignored: !changed,
        task,
    })
}
