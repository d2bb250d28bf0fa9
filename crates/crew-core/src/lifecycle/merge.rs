//! `merge` use-case: land a task's branch on its base.

use tracing::info;

use crate::git::Git;
use crate::sessions::SessionManager;
use crate::tasks::{Task, TaskStatus, TaskStore, branch_name, review_session_name, session_name};
use crate::worktree::WorktreeManager;

use super::deps::Deps;
use super::errors::LifecycleError;

#[derive(Debug, Clone, Default)]
pub struct MergeInput {
    pub task_id: u64,
    pub namespace: String,
    /// Merge target override; falls back to the task's base branch, then
    /// the repository default.
    pub base_branch: Option<String>,
    /// Close instead of done after a successful merge.
    pub close: bool,
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub task: Task,
    pub merged_branch: String,
    pub target: String,
}

pub fn merge(deps: &Deps, input: &MergeInput) -> Result<MergeOutput, LifecycleError> {
    let mut task = deps.get_task(&input.namespace, input.task_id)?;

    let final_status = if input.close {
        TaskStatus::Closed
    } else {
        TaskStatus::Done
    };
    deps.check_transition(&task, final_status)?;

    // Target priority: explicit input, the task's stored base, the
    // repository default.
    let explicit = input
        .base_branch
        .clone()
        .filter(|b| !b.is_empty())
        .or_else(|| (!task.base_branch.is_empty()).then(|| task.base_branch.clone()));
    let default = deps.git.default_branch()?;
    let target = explicit.clone().unwrap_or_else(|| default.clone());

    // The caller must sit on the merge target. A mismatch against an
    // explicit target is reported differently from a mismatch against the
    // plain default branch.
    let current = deps.git.current_branch()?;
    if current != target {
        return Err(if explicit.is_some() {
            LifecycleError::NotOnBaseBranch { current, target }
        } else {
            LifecycleError::NotOnMainBranch { current, default }
        });
    }

    if deps.git.has_uncommitted_changes(&deps.repo_root)? {
        return Err(LifecycleError::UncommittedChanges {
            path: deps.repo_root.display().to_string(),
        });
    }

    for session in [session_name(task.id), review_session_name(task.id)] {
        if deps.sessions.is_running(&session)? {
            deps.sessions.stop(&session)?;
        }
    }

    let branch = branch_name(task.id, task.issue);
    // A conflict leaves the worktree in place so the user can resolve.
    deps.git.merge(&branch, true)?;

    if deps.worktrees.exists(&branch)? {
        deps.worktrees.remove(&branch)?;
    }
    deps.git.delete_branch(&branch, true)?;

    task.status = final_status;
    task.agent.clear();
    task.session.clear();
    if input.close {
        task.close_reason = "merged".to_string();
    }
    deps.store.save(&task)?;

    info!(
        event = "core.lifecycle.merge_completed",
        task_id = task.id,
        branch = %branch,
        target = %target,
    );
    Ok(MergeOutput {
        task,
        merged_branch: branch,
        target,
    })
}
