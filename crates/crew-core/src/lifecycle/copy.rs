//! `copy` use-case: clone a task, optionally with comments and a fresh
//! worktree branched from the source's work.

use tracing::{info, warn};

use crate::git::Git;
use crate::tasks::{Task, TaskStatus, TaskStore, branch_name};
use crate::worktree::WorktreeManager;

use super::deps::Deps;
use super::errors::LifecycleError;

#[derive(Debug, Clone, Default)]
pub struct CopyInput {
    pub task_id: u64,
    pub namespace: String,
    /// Title for the copy; defaults to `"<orig> (copy)"`.
    pub title: Option<String>,
    /// Also copy comments and provision a worktree branched from the
    /// source branch.
    pub copy_all: bool,
}

#[derive(Debug, Clone)]
pub struct CopyOutput {
    pub task: Task,
    pub worktree: Option<std::path::PathBuf>,
}

pub fn copy_task(deps: &Deps, input: &CopyInput) -> Result<CopyOutput, LifecycleError> {
    let source = deps.get_task(&input.namespace, input.task_id)?;
    let namespace = source.namespace_or_default().to_string();

    let id = deps.store.next_id(&namespace)?;
    let mut task = Task {
        id,
        parent_id: source.parent_id,
        title: input
            .title
            .clone()
            .unwrap_or_else(|| format!("{} (copy)", source.title)),
        description: source.description.clone(),
        status: TaskStatus::Todo,
        created: deps.now(),
        base_branch: source.base_branch.clone(),
        labels: source.labels.clone(),
        namespace: namespace.clone(),
        ..Task::default()
    };

    if !input.copy_all {
        deps.store.save(&task)?;
        info!(
            event = "core.lifecycle.copy_completed",
            source_id = source.id,
            task_id = task.id,
        );
        return Ok(CopyOutput {
            task,
            worktree: None,
        });
    }

    // Branch the copy's worktree from the source's branch when it still
    // exists, otherwise from the source's resolved base.
    let source_branch = branch_name(source.id, source.issue);
    let copy_base = if deps.git.branch_exists(&source_branch)? {
        source_branch
    } else {
        deps.resolve_task_base(&source)?
    };

    let new_branch = branch_name(task.id, task.issue);
    let worktree = deps.worktrees.create(&new_branch, &copy_base)?;

    let comments = deps.store.get_comments(&namespace, source.id)?;
    task.base_branch = copy_base.clone();

    if let Err(save_err) = deps.store.save_task_with_comments(&task, &comments) {
        // Unwind the freshly provisioned worktree and branch, joining any
        // rollback failure onto the save failure.
        warn!(
            event = "core.lifecycle.copy_rollback",
            task_id = task.id,
            error = %save_err,
        );
        let original: LifecycleError = save_err.into();
        if let Err(e) = deps.worktrees.remove(&new_branch) {
            return Err(original.with_rollback_failure(&e));
        }
        if let Err(e) = deps.git.delete_branch(&new_branch, true) {
            // The branch may never have materialised when create reused one
            if !matches!(e, crate::git::GitError::BranchNotFound { .. }) {
                return Err(original.with_rollback_failure(&e));
            }
        }
        return Err(original);
    }

    info!(
        event = "core.lifecycle.copy_completed",
        source_id = source.id,
        task_id = task.id,
        copy_all = true,
    );
    Ok(CopyOutput {
        task,
        worktree: Some(worktree),
    })
}
