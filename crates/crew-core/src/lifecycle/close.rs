//! `close` use-case: abandon a task, tearing down its session and
//! worktree.

use tracing::info;

use crate::sessions::SessionManager;
use crate::sessions::script::remove_script;
use crate::tasks::{Task, TaskStatus, TaskStore, branch_name, review_session_name, session_name};
use crate::worktree::WorktreeManager;

use super::deps::Deps;
use super::errors::LifecycleError;

/// Close reason recorded by `close` (as opposed to `merge`).
pub const CLOSE_REASON_ABANDONED: &str = "abandoned";

#[derive(Debug, Clone, Default)]
pub struct CloseInput {
    pub task_id: u64,
    pub namespace: String,
}

#[derive(Debug, Clone)]
pub struct CloseOutput {
    pub task: Task,
    /// True when the task was already closed and nothing changed.
    pub already_closed: bool,
}

pub fn close(deps: &Deps, input: &CloseInput) -> Result<CloseOutput, LifecycleError> {
    let mut task = deps.get_task(&input.namespace, input.task_id)?;

    if task.status == TaskStatus::Closed {
        return Ok(CloseOutput {
            task,
            already_closed: true,
        });
    }
    deps.check_transition(&task, TaskStatus::Closed)?;

    for session in [session_name(task.id), review_session_name(task.id)] {
        if deps.sessions.is_running(&session)? {
            deps.sessions.stop(&session)?;
        }
    }

    let branch = branch_name(task.id, task.issue);
    if deps.worktrees.exists(&branch)? {
        deps.worktrees.remove(&branch)?;
    }

    task.status = TaskStatus::Closed;
    task.agent.clear();
    task.session.clear();
    task.close_reason = CLOSE_REASON_ABANDONED.to_string();
    deps.store.save(&task)?;

    remove_script(&deps.paths.task_script(task.id))?;

    info!(event = "core.lifecycle.close_completed", task_id = task.id);
    Ok(CloseOutput {
        task,
        already_closed: false,
    })
}
