//! `complete` use-case: CI gate, review driver, final transition to done.

use tracing::info;

use crate::cancel::CancelToken;
use crate::exec::{CommandExecutor, ShellCommand};
use crate::git::Git;
use crate::tasks::{Comment, Task, TaskStatus, TaskStore, branch_name};
use crate::worktree::WorktreeManager;

use super::conflict::{ConflictCheckInput, check_and_handle};
use super::deps::Deps;
use super::errors::LifecycleError;
use super::review::run_review_driver;

#[derive(Debug, Clone, Default)]
pub struct CompleteInput {
    pub task_id: u64,
    pub namespace: String,
    /// Run the review driver even when the task or config opts out.
    pub force_review: bool,
    /// Completion note appended as a comment.
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompleteOutput {
    pub task: Task,
    pub reviews_run: u32,
}

pub fn complete(
    deps: &Deps,
    token: &CancelToken,
    input: &CompleteInput,
) -> Result<CompleteOutput, LifecycleError> {
    let mut task = deps.get_task(&input.namespace, input.task_id)?;

    if task.status != TaskStatus::InProgress {
        return Err(LifecycleError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Done,
        });
    }

    let branch = branch_name(task.id, task.issue);
    let worktree = deps.worktrees.resolve(&branch)?;

    if deps.git.has_uncommitted_changes(&worktree)? {
        return Err(LifecycleError::UncommittedChanges {
            path: worktree.display().to_string(),
        });
    }

    let base = deps.resolve_task_base(&task)?;
    check_and_handle(
        deps,
        &ConflictCheckInput {
            task_id: task.id,
            namespace: input.namespace.clone(),
            branch: branch.clone(),
            base_branch: base.clone(),
            add_comment: true,
        },
    )?;
    // The conflict handler may have mutated the row (cleared a stale
    // block); keep working on the fresh copy.
    task = deps.get_task(&input.namespace, input.task_id)?;

    // CI gate.
    if let Some(ref command) = deps.config.complete.command {
        info!(
            event = "core.lifecycle.complete_command_started",
            task_id = task.id,
            command = %command,
        );
        let result = deps.executor.execute_with_cancel(
            token,
            &ShellCommand::new(command.clone()).in_dir(&worktree),
        )?;
        if !result.success() {
            return Err(LifecycleError::CompleteCommandFailed {
                exit_code: result.exit_code,
                output: result.output,
            });
        }
    }

    // Review gate.
    let skip_review = task
        .skip_review
        .unwrap_or(deps.config.complete.skip_review);
    let mut reviews_run = 0;
    if input.force_review || !skip_review {
        let outcome = run_review_driver(deps, token, &mut task, &worktree, &base)?;
        reviews_run = outcome.attempts;
    }

    if let Some(ref text) = input.comment {
        let author = deps.git.user_email().unwrap_or_else(|_| "user".to_string());
        deps.store.add_comment(
            &input.namespace,
            task.id,
            Comment {
                text: text.clone(),
                time: deps.now(),
                author,
                comment_type: None,
                tags: Vec::new(),
            },
        )?;
    }

    task.status = TaskStatus::Done;
    task.agent.clear();
    task.session.clear();
    deps.store.save(&task)?;

    info!(
        event = "core.lifecycle.complete_completed",
        task_id = task.id,
        reviews_run = reviews_run,
    );
    Ok(CompleteOutput { task, reviews_run })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::{harness, harness_with_config, test_config};
    use crate::lifecycle::new_task::{NewTaskInput, new_task};
    use crate::lifecycle::review::{REVIEW_RESULT_MARKER, REVIEW_RUN_START_PREFIX};
    use crate::lifecycle::start::{StartInput, start};
    use crate::tasks::REVIEWER_AUTHOR;

    fn started(h: &crate::lifecycle::test_support::TestHarness) -> u64 {
        let id = new_task(
            &h.deps,
            &NewTaskInput {
                title: "Ship it".to_string(),
                ..NewTaskInput::default()
            },
        )
        .unwrap()
        .task
        .id;
        start(
            &h.deps,
            &StartInput {
                task_id: id,
                ..StartInput::default()
            },
        )
        .unwrap();
        id
    }

    fn review_output(verdict: &str) -> String {
        format!("{REVIEW_RUN_START_PREFIX} 2026-02-01T10:00:00Z\nagent chatter\n{REVIEW_RESULT_MARKER}\n{verdict}\n")
    }

    #[test]
    fn test_complete_with_passing_review() {
        let h = harness();
        let id = started(&h);
        h.sessions.queue_log_body(&review_output("LGTM"));

        let output = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        )
        .unwrap();

        assert_eq!(output.task.status, TaskStatus::Done);
        assert_eq!(output.reviews_run, 1);
        assert_eq!(output.task.review_count, 1);
        assert_eq!(output.task.last_review_text, "LGTM");
        assert!(output.task.agent.is_empty());
        assert!(output.task.session.is_empty());

        let comments = h.deps.store.get_comments("default", id).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author, REVIEWER_AUTHOR);
        assert_eq!(comments[0].text, "LGTM");
    }

    #[test]
    fn test_complete_requires_in_progress() {
        let h = harness();
        let id = new_task(
            &h.deps,
            &NewTaskInput {
                title: "Todo".to_string(),
                ..NewTaskInput::default()
            },
        )
        .unwrap()
        .task
        .id;

        let result = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        );
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidTransition {
                from: TaskStatus::Todo,
                to: TaskStatus::Done
            })
        ));
    }

    #[test]
    fn test_complete_rejects_dirty_worktree() {
        let h = harness();
        let id = started(&h);
        let worktree = h.worktrees.resolve("crew-1").unwrap();
        h.git.dirty_paths.lock().unwrap().insert(worktree);

        let result = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        );
        assert!(matches!(
            result,
            Err(LifecycleError::UncommittedChanges { .. })
        ));
    }

    #[test]
    fn test_conflict_blocks_complete_before_review() {
        let h = harness();
        let id = started(&h);
        h.git.set_conflict("crew-1", "main", &["src/lib.rs"]);
        h.sessions.queue_log_body(&review_output("LGTM"));

        let result = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        );

        match result {
            Err(LifecycleError::MergeConflict { message }) => {
                assert!(!message.is_empty());
                assert!(message.contains("src/lib.rs"));
            }
            other => panic!("expected MergeConflict, got {other:?}"),
        }

        // Task blocked; no reviewer session was started
        let task = h.deps.store.get("default", id).unwrap().unwrap();
        assert!(!task.block_reason.is_empty());
        let started = h.sessions.started.lock().unwrap();
        assert!(started.iter().all(|s| !s.name.ends_with("-review")));
    }

    #[test]
    fn test_complete_command_gate_failure_aborts() {
        let mut config = test_config();
        config.complete.command = Some("cargo test".to_string());
        let h = harness_with_config(config);
        let id = started(&h);
        h.executor.queue_result(2, "test failed: 1 failure");

        let result = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        );
        match result {
            Err(LifecycleError::CompleteCommandFailed { exit_code, output }) => {
                assert_eq!(exit_code, 2);
                assert!(output.contains("test failed"));
            }
            other => panic!("expected CompleteCommandFailed, got {other:?}"),
        }

        // Gate ran in the worktree
        let calls = h.executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "cargo test");
    }

    #[test]
    fn test_review_success_on_third_attempt() {
        let h = harness();
        let id = started(&h);
        h.sessions.queue_log_body(&review_output("needs fix: error paths"));
        h.sessions.queue_log_body(&review_output("needs fix: tests"));
        h.sessions.queue_log_body(&review_output("LGTM"));

        let output = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        )
        .unwrap();

        assert_eq!(output.reviews_run, 3);
        assert_eq!(output.task.review_count, 3);
        assert!(output.task.last_review_text.ends_with("LGTM"));
        assert_eq!(output.task.status, TaskStatus::Done);

        let comments = h.deps.store.get_comments("default", id).unwrap();
        assert_eq!(comments.len(), 3);
        assert!(comments.iter().all(|c| c.author == REVIEWER_AUTHOR));
        assert_eq!(comments[2].text, output.task.last_review_text);
    }

    #[test]
    fn test_review_exhaustion_fails_complete() {
        let h = harness();
        let id = started(&h);
        for _ in 0..3 {
            h.sessions.queue_log_body(&review_output("needs fix"));
        }

        let result = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        );
        assert!(matches!(
            result,
            Err(LifecycleError::ReviewFailed { attempts: 3 })
        ));

        // Bookkeeping still recorded each attempt
        let task = h.deps.store.get("default", id).unwrap().unwrap();
        assert_eq!(task.review_count, 3);
        assert_ne!(task.status, TaskStatus::Done);
    }

    #[test]
    fn test_missing_marker_embeds_log_tail() {
        let h = harness();
        let id = started(&h);
        h.sessions
            .queue_log_body("reviewer crashed before writing any marker\n");

        let result = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        );
        match result {
            Err(LifecycleError::NoReviewComment { log_tail }) => {
                assert!(log_tail.contains("reviewer crashed"));
            }
            other => panic!("expected NoReviewComment, got {other:?}"),
        }
    }

    #[test]
    fn test_skip_review_goes_straight_to_done() {
        let h = harness();
        let id = started(&h);
        let mut task = h.deps.store.get("default", id).unwrap().unwrap();
        task.skip_review = Some(true);
        h.deps.store.save(&task).unwrap();

        let output = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        )
        .unwrap();

        assert_eq!(output.reviews_run, 0);
        assert_eq!(output.task.review_count, 0);
        assert_eq!(output.task.status, TaskStatus::Done);
    }

    #[test]
    fn test_force_review_overrides_skip() {
        let h = harness();
        let id = started(&h);
        let mut task = h.deps.store.get("default", id).unwrap().unwrap();
        task.skip_review = Some(true);
        h.deps.store.save(&task).unwrap();
        h.sessions.queue_log_body(&review_output("LGTM"));

        let output = complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                force_review: true,
                ..CompleteInput::default()
            },
        )
        .unwrap();
        assert_eq!(output.reviews_run, 1);
    }

    #[test]
    fn test_completion_comment_appended_with_git_author() {
        let h = harness();
        let id = started(&h);
        h.sessions.queue_log_body(&review_output("LGTM"));

        complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                comment: Some("Shipping this tonight".to_string()),
                ..CompleteInput::default()
            },
        )
        .unwrap();

        let comments = h.deps.store.get_comments("default", id).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].text, "Shipping this tonight");
        assert_eq!(comments[1].author, "dev@example.com");
    }

    #[test]
    fn test_reviewer_session_uses_review_name_and_worktree() {
        let h = harness();
        let id = started(&h);
        h.sessions.queue_log_body(&review_output("LGTM"));

        complete(
            &h.deps,
            &CancelToken::new(),
            &CompleteInput {
                task_id: id,
                ..CompleteInput::default()
            },
        )
        .unwrap();

        let started = h.sessions.started.lock().unwrap();
        let review = started.iter().find(|s| s.name == "crew-1-review").unwrap();
        assert_eq!(review.working_dir, h.worktrees.resolve("crew-1").unwrap());
        assert!(review.command.contains("review-1-1.sh"));
    }
}
