//! Review driver: runs reviewer sessions inside `complete` until the
//! reviewer's verdict matches the configured success gate.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::render::render_template;
use crate::sessions::SessionManager;
use crate::sessions::log::{read_from_offset, tail_lines};
use crate::sessions::script::{render_env_exports, render_prompt_heredoc, write_script};
use crate::sessions::types::{SessionTask, SessionType, StartOptions};
use crate::tasks::{Comment, REVIEWER_AUTHOR, Task, TaskStore, review_session_name};

use super::deps::Deps;
use super::errors::LifecycleError;

/// Marker line written at the top of each review run's output.
pub const REVIEW_RUN_START_PREFIX: &str = "---CREW_REVIEW_RUN_START---";

/// The final review verdict begins on the line immediately after a line
/// equal to this marker.
pub const REVIEW_RESULT_MARKER: &str = "---CREW_REVIEW_RESULT---";

const DEFAULT_REVIEW_PROMPT: &str = "\
You are reviewing the work for task {{task_id}}: {{title}}.

Inspect the changes in {{worktree}} against branch {{base_branch}}.
{{description}}

When you are done, print a line containing exactly
---CREW_REVIEW_RESULT---
followed on the next line by your verdict.";

/// Anchor the configured success pattern so partial matches cannot pass.
pub fn anchor_review_success_regex(pattern: &str) -> Result<Regex, LifecycleError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| LifecycleError::RollbackFailed {
        message: format!("review_success_regex does not compile: {e}"),
    })
}

/// Extract the verdict from a review run's log slice: the trimmed text
/// after the last line equal to the result marker.
pub fn parse_review_result(content: &str) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let marker_index = lines
        .iter()
        .rposition(|line| line.trim() == REVIEW_RESULT_MARKER)?;
    let verdict = lines[marker_index + 1..].join("\n").trim().to_string();
    Some(verdict)
}

fn ansi_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap())
}

/// Strip terminal escape sequences an agent may interleave with its
/// verdict.
fn strip_ansi(content: &str) -> String {
    ansi_escape_re().replace_all(content, "").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub attempts: u32,
    pub verdict: String,
}

/// Run up to `max_reviews` reviewer sessions; succeed when a verdict
/// matches the anchored success regex.
///
/// Every iteration that yields a verdict appends a reviewer comment and
/// updates the task's review bookkeeping, pass or fail.
pub fn run_review_driver(
    deps: &Deps,
    token: &CancelToken,
    task: &mut Task,
    worktree: &std::path::Path,
    base_branch: &str,
) -> Result<ReviewOutcome, LifecycleError> {
    let reviewer_name = deps
        .config
        .complete
        .reviewer
        .clone()
        .or_else(|| (!task.agent.is_empty()).then(|| task.agent.clone()))
        .ok_or(LifecycleError::NoAgent)?;
    let reviewer = deps
        .config
        .agent(&reviewer_name)
        .map_err(LifecycleError::from_agent_lookup)?
        .clone();

    let success_re = anchor_review_success_regex(&deps.config.complete.review_success_regex)?;
    let max_reviews = deps.config.complete.max_reviews;
    let session = review_session_name(task.id);
    let log_path = deps.paths.session_log(&session);

    for attempt in 1..=max_reviews {
        info!(
            event = "core.lifecycle.review_attempt_started",
            task_id = task.id,
            attempt = attempt,
            max_reviews = max_reviews,
        );

        let mut values = std::collections::BTreeMap::new();
        values.insert("task_id", task.id.to_string());
        values.insert("title", task.title.clone());
        values.insert("description", task.description.clone());
        values.insert("worktree", worktree.display().to_string());
        values.insert("base_branch", base_branch.to_string());
        values.insert("previous_review", task.last_review_text.clone());
        values.insert("prompt", "\"$CREW_PROMPT\"".to_string());

        let prompt = render_template(DEFAULT_REVIEW_PROMPT, &values);
        let prompt_path = deps.paths.review_prompt(task.id, attempt);
        if let Some(parent) = prompt_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::sessions::SessionError::IoError { source: e })?;
        }
        std::fs::write(&prompt_path, &prompt)
            .map_err(|e| crate::sessions::SessionError::IoError { source: e })?;

        let command_template = reviewer.review_command.as_deref().unwrap_or(&reviewer.command);
        let command = render_template(command_template, &values);

        let script = build_review_script(&reviewer.env, &prompt, &command, &deps.now())?;
        let script_path = deps.paths.review_script(task.id, attempt);
        write_script(&script_path, &script)?;

        let record = deps.sessions.start(&StartOptions {
            name: session.clone(),
            working_dir: worktree.to_path_buf(),
            command: script_path.to_string_lossy().into_owned(),
            log_path: log_path.clone(),
            session_type: SessionType::Reviewer,
            task: Some(SessionTask {
                id: task.id,
                title: task.title.clone(),
                agent: reviewer_name.clone(),
            }),
        })?;

        if let Err(e) = deps.sessions.wait(token, &session) {
            // Cancellation must not leave a reviewer running.
            if deps.sessions.is_running(&session).unwrap_or(false) {
                let _ = deps.sessions.stop(&session);
            }
            return Err(e.into());
        }

        let content = strip_ansi(&read_from_offset(&log_path, record.log_offset)?);
        let Some(verdict) = parse_review_result(&content) else {
            let log_tail = tail_lines(&log_path, 20)?;
            warn!(
                event = "core.lifecycle.review_no_marker",
                task_id = task.id,
                attempt = attempt,
            );
            return Err(LifecycleError::NoReviewComment { log_tail });
        };

        let now = deps.now();
        deps.store.add_comment(
            task.namespace_or_default(),
            task.id,
            Comment {
                text: verdict.clone(),
                time: now.clone(),
                author: REVIEWER_AUTHOR.to_string(),
                comment_type: Some("review".to_string()),
                tags: Vec::new(),
            },
        )?;

        task.review_count += 1;
        task.last_review_at = Some(now);
        task.last_review_text = verdict.clone();
        deps.store.save(task)?;

        if success_re.is_match(&verdict) {
            info!(
                event = "core.lifecycle.review_succeeded",
                task_id = task.id,
                attempt = attempt,
            );
            return Ok(ReviewOutcome {
                attempts: attempt,
                verdict,
            });
        }

        info!(
            event = "core.lifecycle.review_reprompt",
            task_id = task.id,
            attempt = attempt,
            verdict = %verdict,
        );
    }

    Err(LifecycleError::ReviewFailed {
        attempts: max_reviews,
    })
}

/// Build the review session script: the run-start marker line, the
/// reviewer env + prompt, then the reviewer command.
fn build_review_script(
    env: &std::collections::BTreeMap<String, String>,
    prompt: &str,
    command: &str,
    started_at: &str,
) -> Result<String, LifecycleError> {
    let mut script = String::new();
    script.push_str("#!/usr/bin/env bash\n");
    script.push_str("set -u\n\n");
    script.push_str(&format!(
        "echo {}\n\n",
        crate::render::shell_quote(&format!("{REVIEW_RUN_START_PREFIX} {started_at}"))
    ));
    let exports = render_env_exports(env)?;
    if !exports.is_empty() {
        script.push_str(&exports);
        script.push('\n');
    }
    script.push_str(&render_prompt_heredoc(prompt));
    script.push('\n');
    script.push_str(command);
    script.push('\n');
    Ok(script)
}
