//! `new` and `create_tasks_from_file` use-cases.

use tracing::info;

use crate::tasks::draft::{ParentRef, parse_drafts};
use crate::tasks::{Task, TaskError, TaskStatus, TaskStore};

use super::deps::Deps;
use super::errors::LifecycleError;

#[derive(Debug, Clone, Default)]
pub struct NewTaskInput {
    pub title: String,
    pub description: String,
    pub parent_id: Option<u64>,
    pub labels: Vec<String>,
    pub issue: u64,
    pub base_branch: Option<String>,
    pub namespace: String,
    pub skip_review: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewTaskOutput {
    pub task: Task,
}

/// Create a task row. No worktree or session is provisioned here.
pub fn new_task(deps: &Deps, input: &NewTaskInput) -> Result<NewTaskOutput, LifecycleError> {
    if input.title.trim().is_empty() {
        return Err(TaskError::EmptyTitle.into());
    }

    let namespace = if input.namespace.is_empty() {
        crate::tasks::DEFAULT_NAMESPACE.to_string()
    } else {
        input.namespace.clone()
    };

    if let Some(parent_id) = input.parent_id
        && deps.store.get(&namespace, parent_id)?.is_none()
    {
        return Err(TaskError::ParentNotFound { id: parent_id }.into());
    }

    let base_branch = deps.resolve_new_task_base(input.base_branch.as_deref())?;
    let id = deps.store.next_id(&namespace)?;

    let mut task = Task {
        id,
        parent_id: input.parent_id,
        title: input.title.trim().to_string(),
        description: input.description.clone(),
        status: TaskStatus::Todo,
        created: deps.now(),
        issue: input.issue,
        base_branch,
        skip_review: input.skip_review,
        namespace,
        ..Task::default()
    };
    for label in &input.labels {
        task.add_label(label.clone());
    }

    deps.store.save(&task)?;
    info!(
        event = "core.lifecycle.task_created",
        task_id = task.id,
        namespace = %task.namespace,
        title = %task.title,
    );
    Ok(NewTaskOutput { task })
}

#[derive(Debug, Clone, Default)]
pub struct CreateFromFileInput {
    pub content: String,
    pub namespace: String,
    pub base_branch: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct CreateFromFileOutput {
    pub tasks: Vec<Task>,
}

/// Create tasks from a draft document, resolving in-file parent references
/// in order.
///
/// `dry_run` parses and validates only: pseudo-ids are assigned from 1,
/// absolute parent references are not verified, and nothing is written.
pub fn create_tasks_from_file(
    deps: &Deps,
    input: &CreateFromFileInput,
) -> Result<CreateFromFileOutput, LifecycleError> {
    let drafts = parse_drafts(&input.content)?;

    // Map from a draft's 1-based in-file index to its created id.
    let mut created_ids: Vec<u64> = Vec::with_capacity(drafts.len());
    let mut tasks = Vec::with_capacity(drafts.len());

    if input.dry_run {
        for (index, draft) in drafts.iter().enumerate() {
            let parent_id = match draft.parent {
                None => None,
                Some(ParentRef::Relative(reference)) => {
                    if reference > index {
                        return Err(TaskError::InvalidParentRef {
                            reference: reference.to_string(),
                        }
                        .into());
                    }
                    Some(created_ids[reference - 1])
                }
                // Absolute references are taken at face value in dry runs.
                Some(ParentRef::Absolute(id)) => Some(id),
            };

            let id = (index + 1) as u64;
            created_ids.push(id);
            let mut task = Task {
                id,
                parent_id,
                title: draft.title.clone(),
                description: draft.description.clone(),
                status: TaskStatus::Todo,
                namespace: input.namespace.clone(),
                ..Task::default()
            };
            for label in &draft.labels {
                task.add_label(label.clone());
            }
            tasks.push(task);
        }
        return Ok(CreateFromFileOutput { tasks });
    }

    for (index, draft) in drafts.iter().enumerate() {
        let parent_id = match draft.parent {
            None => None,
            Some(ParentRef::Relative(reference)) => {
                if reference > index {
                    return Err(TaskError::InvalidParentRef {
                        reference: reference.to_string(),
                    }
                    .into());
                }
                Some(created_ids[reference - 1])
            }
            Some(ParentRef::Absolute(id)) => Some(id),
        };

        let output = new_task(
            deps,
            &NewTaskInput {
                title: draft.title.clone(),
                description: draft.description.clone(),
                parent_id,
                labels: draft.labels.clone(),
                base_branch: input.base_branch.clone(),
                namespace: input.namespace.clone(),
                ..NewTaskInput::default()
            },
        )?;
        created_ids.push(output.task.id);
        tasks.push(output.task);
    }

    info!(
        event = "core.lifecycle.tasks_created_from_file",
        count = tasks.len(),
    );
    Ok(CreateFromFileOutput { tasks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::harness;

    #[test]
    fn test_new_task_basic() {
        let h = harness();
        let output = new_task(
            &h.deps,
            &NewTaskInput {
                title: "  Fix auth  ".to_string(),
                description: "Details".to_string(),
                labels: vec!["backend".to_string(), "backend".to_string()],
                ..NewTaskInput::default()
            },
        )
        .unwrap();

        assert_eq!(output.task.id, 1);
        assert_eq!(output.task.title, "Fix auth");
        assert_eq!(output.task.status, TaskStatus::Todo);
        assert_eq!(output.task.labels, vec!["backend"]);
        assert_eq!(output.task.base_branch, "main");
        assert_eq!(output.task.created, "2026-02-01T10:00:00Z");

        let stored = h.deps.store.get("default", 1).unwrap().unwrap();
        assert_eq!(stored, output.task);
    }

    #[test]
    fn test_new_task_empty_title_rejected() {
        let h = harness();
        let result = new_task(
            &h.deps,
            &NewTaskInput {
                title: "   ".to_string(),
                ..NewTaskInput::default()
            },
        );
        assert!(matches!(
            result,
            Err(LifecycleError::Task(TaskError::EmptyTitle))
        ));
    }

    #[test]
    fn test_new_task_parent_must_exist() {
        let h = harness();
        let result = new_task(
            &h.deps,
            &NewTaskInput {
                title: "Child".to_string(),
                parent_id: Some(42),
                ..NewTaskInput::default()
            },
        );
        assert!(matches!(
            result,
            Err(LifecycleError::Task(TaskError::ParentNotFound { id: 42 }))
        ));
    }

    #[test]
    fn test_new_task_base_resolution_explicit_wins() {
        let h = harness();
        let output = new_task(
            &h.deps,
            &NewTaskInput {
                title: "T".to_string(),
                base_branch: Some("feature/x".to_string()),
                ..NewTaskInput::default()
            },
        )
        .unwrap();
        assert_eq!(output.task.base_branch, "feature/x");
    }

    #[test]
    fn test_new_task_base_from_config_default_policy() {
        let mut config = crate::lifecycle::test_support::test_config();
        config.tasks.new_task_base = crew_config::NewTaskBase::Default;
        let h = crate::lifecycle::test_support::harness_with_config(config);
        *h.git.current.lock().unwrap() = "feature/elsewhere".to_string();

        let output = new_task(
            &h.deps,
            &NewTaskInput {
                title: "T".to_string(),
                ..NewTaskInput::default()
            },
        )
        .unwrap();
        assert_eq!(output.task.base_branch, "main");
    }

    #[test]
    fn test_new_task_base_from_current_branch() {
        let h = harness();
        *h.git.current.lock().unwrap() = "feature/work".to_string();

        let output = new_task(
            &h.deps,
            &NewTaskInput {
                title: "T".to_string(),
                ..NewTaskInput::default()
            },
        )
        .unwrap();
        assert_eq!(output.task.base_branch, "feature/work");
    }

    #[test]
    fn test_create_from_file_with_relative_parent() {
        let h = harness();
        let content = "\
---
title: Phase 1
labels: [backend]
---
Phase 1 description.

---
title: Phase 2
parent: 1
---
Phase 2 description.
";
        let output = create_tasks_from_file(
            &h.deps,
            &CreateFromFileInput {
                content: content.to_string(),
                ..CreateFromFileInput::default()
            },
        )
        .unwrap();

        assert_eq!(output.tasks.len(), 2);
        let first = &output.tasks[0];
        let second = &output.tasks[1];
        assert_eq!(first.title, "Phase 1");
        assert_eq!(second.parent_id, Some(first.id));
        assert_eq!(first.status, TaskStatus::Todo);
        assert_eq!(second.status, TaskStatus::Todo);
        assert_eq!(first.base_branch, "main");
        assert_eq!(second.base_branch, "main");
    }

    #[test]
    fn test_create_from_file_absolute_parent_resolves_to_existing_id() {
        let h = harness();
        // Pre-seed task 1
        new_task(
            &h.deps,
            &NewTaskInput {
                title: "Existing Task 1".to_string(),
                ..NewTaskInput::default()
            },
        )
        .unwrap();

        let content = "\
---
title: New A
---
A body.

---
title: New B
parent: #1
---
B body.
";
        let output = create_tasks_from_file(
            &h.deps,
            &CreateFromFileInput {
                content: content.to_string(),
                ..CreateFromFileInput::default()
            },
        )
        .unwrap();

        // The absolute reference points at the pre-seeded task, not the
        // in-file first draft
        assert_eq!(output.tasks[0].id, 2);
        assert_eq!(output.tasks[0].parent_id, None);
        assert_eq!(output.tasks[1].id, 3);
        assert_eq!(output.tasks[1].parent_id, Some(1));
    }

    #[test]
    fn test_create_from_file_forward_relative_parent_rejected() {
        let h = harness();
        let content = "\
---
title: A
parent: 2
---
Body.

---
title: B
---
Body.
";
        let result = create_tasks_from_file(
            &h.deps,
            &CreateFromFileInput {
                content: content.to_string(),
                ..CreateFromFileInput::default()
            },
        );
        assert!(matches!(
            result,
            Err(LifecycleError::Task(TaskError::InvalidParentRef { .. }))
        ));
    }

    #[test]
    fn test_create_from_file_dry_run_writes_nothing() {
        let h = harness();
        let content = "\
---
title: A
---
Body.

---
title: B
parent: 1
---
Body.
";
        let output = create_tasks_from_file(
            &h.deps,
            &CreateFromFileInput {
                content: content.to_string(),
                dry_run: true,
                ..CreateFromFileInput::default()
            },
        )
        .unwrap();

        // Pseudo-ids from 1; nothing persisted
        assert_eq!(output.tasks[0].id, 1);
        assert_eq!(output.tasks[1].id, 2);
        assert_eq!(output.tasks[1].parent_id, Some(1));
        assert!(h.deps.store.list_all(&Default::default()).unwrap().is_empty());
    }

    #[test]
    fn test_create_from_file_dry_run_skips_absolute_verification() {
        let h = harness();
        let content = "\
---
title: A
parent: #999
---
Body.
";
        let output = create_tasks_from_file(
            &h.deps,
            &CreateFromFileInput {
                content: content.to_string(),
                dry_run: true,
                ..CreateFromFileInput::default()
            },
        )
        .unwrap();
        assert_eq!(output.tasks[0].parent_id, Some(999));
    }
}
