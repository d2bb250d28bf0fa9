//! Prune: reconcile tasks, worktrees, and crew branches, deleting
//! orphaned resources and terminal tasks.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::git::Git;
use crate::lifecycle::{Deps, LifecycleError};
use crate::tasks::TaskStore;
use crate::worktree::WorktreeManager;
use crate::tasks::{TaskFilter, TaskStatus, branch_name};

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneInput {
    /// Also prune `done` tasks (closed tasks are always prunable).
    pub all: bool,
    /// Compute the plan without mutating anything.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    /// Worktrees whose branch has no matching task.
    pub orphan_worktrees: Vec<String>,
    /// `crew-*` branches with no matching task.
    pub orphan_branches: Vec<String>,
    /// `(namespace, id)` of tasks eligible for deletion.
    pub prunable_tasks: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Default)]
pub struct PruneOutput {
    pub plan: PrunePlan,
    /// Failures encountered while deleting; pruning continues past them.
    pub errors: Vec<String>,
}

pub fn prune(deps: &Deps, input: &PruneInput) -> Result<PruneOutput, LifecycleError> {
    let tasks = deps.store.list_all(&TaskFilter::all())?;

    let task_branches: BTreeSet<String> = tasks
        .iter()
        .map(|t| branch_name(t.id, t.issue))
        .collect();

    let orphan_worktrees: Vec<String> = deps
        .worktrees
        .list()?
        .into_iter()
        .filter(|branch| !task_branches.contains(branch))
        .collect();

    let orphan_branches: Vec<String> = deps
        .git
        .list_branches()?
        .into_iter()
        .filter(|branch| branch.starts_with("crew-") && !task_branches.contains(branch))
        .collect();

    let prunable_tasks: Vec<(String, u64)> = tasks
        .iter()
        .filter(|t| {
            t.status == TaskStatus::Closed || (input.all && t.status == TaskStatus::Done)
        })
        .map(|t| (t.namespace_or_default().to_string(), t.id))
        .collect();

    let plan = PrunePlan {
        orphan_worktrees,
        orphan_branches,
        prunable_tasks,
    };

    info!(
        event = "core.prune.planned",
        orphan_worktrees = plan.orphan_worktrees.len(),
        orphan_branches = plan.orphan_branches.len(),
        prunable_tasks = plan.prunable_tasks.len(),
        dry_run = input.dry_run,
    );

    if input.dry_run {
        return Ok(PruneOutput {
            plan,
            errors: Vec::new(),
        });
    }

    let mut errors = Vec::new();

    // Worktrees first, branches next, task rows last, so a partial run
    // leaves only resources a later run can still see and clean up.
    for branch in &plan.orphan_worktrees {
        if let Err(e) = deps.worktrees.remove(branch) {
            warn!(event = "core.prune.worktree_failed", branch = %branch, error = %e);
            errors.push(format!("remove worktree {branch}: {e}"));
        }
    }

    for branch in &plan.orphan_branches {
        if let Err(e) = deps.git.delete_branch(branch, true) {
            warn!(event = "core.prune.branch_failed", branch = %branch, error = %e);
            errors.push(format!("delete branch {branch}: {e}"));
        }
    }

    for (namespace, id) in &plan.prunable_tasks {
        // A prunable task's own worktree and branch go with it.
        let branch = tasks
            .iter()
            .find(|t| t.id == *id && t.namespace_or_default() == namespace)
            .map(|t| branch_name(t.id, t.issue));
        if let Some(branch) = branch {
            if deps.worktrees.exists(&branch).unwrap_or(false)
                && let Err(e) = deps.worktrees.remove(&branch)
            {
                errors.push(format!("remove worktree {branch}: {e}"));
            }
            if deps.git.branch_exists(&branch).unwrap_or(false)
                && let Err(e) = deps.git.delete_branch(&branch, true)
            {
                errors.push(format!("delete branch {branch}: {e}"));
            }
        }
        if let Err(e) = deps.store.delete(namespace, *id) {
            warn!(event = "core.prune.task_failed", task_id = id, error = %e);
            errors.push(format!("delete task {namespace}/{id}: {e}"));
        }
    }

    info!(event = "core.prune.completed", errors = errors.len());
    Ok(PruneOutput { plan, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::harness;
    use crate::lifecycle::new_task::{NewTaskInput, new_task};

    fn seeded(h: &crate::lifecycle::test_support::TestHarness, status: TaskStatus) -> u64 {
        let id = new_task(
            &h.deps,
            &NewTaskInput {
                title: format!("task {status}"),
                ..NewTaskInput::default()
            },
        )
        .unwrap()
        .task
        .id;
        let mut task = h.deps.store.get("default", id).unwrap().unwrap();
        task.status = status;
        h.deps.store.save(&task).unwrap();
        id
    }

    #[test]
    fn test_prune_plan_finds_orphans() {
        let h = harness();
        let live = seeded(&h, TaskStatus::InProgress);
        h.worktrees.seed(&branch_name(live, 0));
        h.worktrees.seed("crew-99");
        h.git.branches.lock().unwrap().insert("crew-99".to_string());
        h.git.branches.lock().unwrap().insert(branch_name(live, 0));

        let output = prune(
            &h.deps,
            &PruneInput {
                all: false,
                dry_run: true,
            },
        )
        .unwrap();

        assert_eq!(output.plan.orphan_worktrees, vec!["crew-99"]);
        assert_eq!(output.plan.orphan_branches, vec!["crew-99"]);
        assert!(output.plan.prunable_tasks.is_empty());

        // Dry run mutated nothing
        assert!(h.worktrees.exists("crew-99").unwrap());
        assert!(h.git.branches.lock().unwrap().contains("crew-99"));
    }

    #[test]
    fn test_prune_closed_always_done_only_with_all() {
        let h = harness();
        let closed = seeded(&h, TaskStatus::Closed);
        let done = seeded(&h, TaskStatus::Done);
        let live = seeded(&h, TaskStatus::InProgress);

        let without_all = prune(
            &h.deps,
            &PruneInput {
                all: false,
                dry_run: true,
            },
        )
        .unwrap();
        assert_eq!(
            without_all.plan.prunable_tasks,
            vec![("default".to_string(), closed)]
        );

        let with_all = prune(
            &h.deps,
            &PruneInput {
                all: true,
                dry_run: true,
            },
        )
        .unwrap();
        let ids: Vec<u64> = with_all.plan.prunable_tasks.iter().map(|(_, id)| *id).collect();
        assert!(ids.contains(&closed));
        assert!(ids.contains(&done));
        assert!(!ids.contains(&live));
    }

    #[test]
    fn test_prune_deletes_orphans_and_terminal_tasks() {
        let h = harness();
        let closed = seeded(&h, TaskStatus::Closed);
        h.worktrees.seed(&branch_name(closed, 0));
        h.git
            .branches
            .lock()
            .unwrap()
            .insert(branch_name(closed, 0));
        h.worktrees.seed("crew-50");
        h.git.branches.lock().unwrap().insert("crew-50".to_string());

        let output = prune(
            &h.deps,
            &PruneInput {
                all: false,
                dry_run: false,
            },
        )
        .unwrap();

        assert!(output.errors.is_empty());
        assert!(h.deps.store.get("default", closed).unwrap().is_none());
        assert!(!h.worktrees.exists("crew-50").unwrap());
        assert!(!h.worktrees.exists(&branch_name(closed, 0)).unwrap());
        assert!(!h.git.branches.lock().unwrap().contains("crew-50"));
        assert!(!h.git.branches.lock().unwrap().contains(&branch_name(closed, 0)));
    }

    #[test]
    fn test_prune_continues_past_failures() {
        let h = harness();
        let closed = seeded(&h, TaskStatus::Closed);
        h.worktrees.seed("crew-60");
        h.git.branches.lock().unwrap().insert("crew-61".to_string());
        h.git.fail_delete.lock().unwrap().insert("crew-61".to_string());

        let output = prune(
            &h.deps,
            &PruneInput {
                all: false,
                dry_run: false,
            },
        )
        .unwrap();

        // The branch failure is aggregated, everything else proceeded
        assert_eq!(output.errors.len(), 1);
        assert!(output.errors[0].contains("crew-61"));
        assert!(!h.worktrees.exists("crew-60").unwrap());
        assert!(h.deps.store.get("default", closed).unwrap().is_none());
    }

    #[test]
    fn test_prune_ignores_non_crew_branches() {
        let h = harness();
        h.git.branches.lock().unwrap().insert("feature/own-work".to_string());

        let output = prune(
            &h.deps,
            &PruneInput {
                all: false,
                dry_run: true,
            },
        )
        .unwrap();
        assert!(output.plan.orphan_branches.is_empty());
    }
}
