//! Conflict handler: probe a task's branch against its base and annotate
//! the task.

use tracing::info;

use crate::git::Git;
use crate::tasks::{Comment, TaskStore};

use super::deps::Deps;
use super::errors::LifecycleError;

/// Prefix every handler-written block reason carries, so the handler can
/// tell its own annotations from user-set blocks when clearing.
const CONFLICT_BLOCK_PREFIX: &str = "merge conflict with ";

#[derive(Debug, Clone, Default)]
pub struct ConflictCheckInput {
    pub task_id: u64,
    pub namespace: String,
    pub branch: String,
    pub base_branch: String,
    /// Also record an advisory comment on the task when a conflict is
    /// found.
    pub add_comment: bool,
}

/// Check the branch against its base.
///
/// On conflict: set `block_reason` to a message listing the conflicting
/// files, optionally add an advisory comment, and return `MergeConflict`
/// carrying that message. On a clean probe: clear a previously handler-set
/// block and return the (empty) file list.
pub fn check_and_handle(
    deps: &Deps,
    input: &ConflictCheckInput,
) -> Result<Vec<String>, LifecycleError> {
    let mut task = deps.get_task(&input.namespace, input.task_id)?;

    let files = deps
        .git
        .merge_conflict_files(&input.branch, &input.base_branch)?;

    if files.is_empty() {
        if task.block_reason.starts_with(CONFLICT_BLOCK_PREFIX) {
            task.block_reason.clear();
            deps.store.save(&task)?;
            info!(event = "core.lifecycle.conflict_cleared", task_id = task.id);
        }
        return Ok(files);
    }

    let message = format!(
        "{CONFLICT_BLOCK_PREFIX}{}: conflicting files: {}",
        input.base_branch,
        files.join(", ")
    );

    task.block_reason = message.clone();
    deps.store.save(&task)?;

    if input.add_comment {
        deps.store.add_comment(
            &input.namespace,
            input.task_id,
            Comment {
                text: message.clone(),
                time: deps.now(),
                author: "system".to_string(),
                comment_type: Some("system".to_string()),
                tags: Vec::new(),
            },
        )?;
    }

    info!(
        event = "core.lifecycle.conflict_detected",
        task_id = task.id,
        base = %input.base_branch,
        files = ?files,
    );
    Err(LifecycleError::MergeConflict { message })
}
