//! `stop` use-case.

use tracing::info;

use crate::sessions::SessionManager;
use crate::sessions::script::remove_script;
use crate::tasks::{Task, TaskStatus, TaskStore, review_session_name, session_name};

use super::deps::Deps;
use super::errors::LifecycleError;

#[derive(Debug, Clone, Default)]
pub struct StopInput {
    pub task_id: u64,
    pub namespace: String,
}

#[derive(Debug, Clone)]
pub struct StopOutput {
    pub task: Task,
    /// True when a review session (not the worker) was stopped; the task
    /// status is left untouched in that case.
    pub stopped_review: bool,
}

pub fn stop(deps: &Deps, input: &StopInput) -> Result<StopOutput, LifecycleError> {
    let mut task = deps.get_task(&input.namespace, input.task_id)?;

    let worker = session_name(task.id);
    let review = review_session_name(task.id);

    let worker_running = deps.sessions.is_running(&worker)?;
    let review_running = deps.sessions.is_running(&review)?;

    // A running review with no worker: stop the review only and leave the
    // task status alone so `complete` can be retried.
    if !worker_running && review_running {
        deps.sessions.stop(&review)?;
        remove_review_files(deps, task.id)?;
        remove_script(&deps.paths.task_script(task.id))?;
        info!(
            event = "core.lifecycle.stop_review_session",
            task_id = task.id,
        );
        return Ok(StopOutput {
            task,
            stopped_review: true,
        });
    }

    if worker_running {
        deps.sessions.stop(&worker)?;
    }

    if worker_running || !task.session.is_empty() {
        task.agent.clear();
        task.session.clear();
        if task.status != TaskStatus::InReview {
            task.status = TaskStatus::Stopped;
        }
        deps.store.save(&task)?;
        info!(
            event = "core.lifecycle.stop_completed",
            task_id = task.id,
            status = %task.status,
        );
    }

    remove_script(&deps.paths.task_script(task.id))?;

    Ok(StopOutput {
        task,
        stopped_review: false,
    })
}

fn remove_review_files(deps: &Deps, task_id: u64) -> Result<(), LifecycleError> {
    // Review scripts and prompts are numbered per attempt; sweep them all.
    let scripts_dir = deps.paths.scripts_dir();
    let entries = match std::fs::read_dir(&scripts_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(crate::sessions::SessionError::IoError { source: e }.into()),
    };

    let prefix = format!("review-{task_id}-");
    for entry in entries {
        let entry = entry.map_err(|e| crate::sessions::SessionError::IoError { source: e })?;
        if let Some(name) = entry.file_name().to_str()
            && name.starts_with(&prefix)
        {
            remove_script(&entry.path())?;
        }
    }
    Ok(())
}
