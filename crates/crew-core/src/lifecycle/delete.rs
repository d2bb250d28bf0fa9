//! `delete` use-case: remove a task row.
//!
//! This is the low-level primitive; `close` is the high-level verb. The
//! caller owns any session or worktree cleanup.

use tracing::info;

use crate::tasks::TaskStore;

use super::deps::Deps;
use super::errors::LifecycleError;

#[derive(Debug, Clone, Default)]
pub struct DeleteInput {
    pub task_id: u64,
    pub namespace: String,
}

pub fn delete(deps: &Deps, input: &DeleteInput) -> Result<(), LifecycleError> {
    deps.store.delete(&input.namespace, input.task_id)?;
    info!(
        event = "core.lifecycle.delete_completed",
        task_id = input.task_id,
    );
    Ok(())
}
