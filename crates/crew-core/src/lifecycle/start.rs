//! `start` use-case: provision worktree + script + session, then bind the
//! task to them.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use crate::exec::ScriptRunner;
use crate::git::Git;
use crate::render::render_template;
use crate::sessions::SessionManager;
use crate::sessions::script::{build_task_script, remove_script, write_script};
use crate::sessions::types::{SessionTask, SessionType, StartOptions};
use crate::tasks::{Task, TaskStatus, TaskStore, branch_name, session_name};
use crate::worktree::WorktreeManager;

use super::deps::Deps;
use super::errors::LifecycleError;

#[derive(Debug, Clone, Default)]
pub struct StartInput {
    pub task_id: u64,
    pub namespace: String,
    /// Agent override; falls back to the task's bound agent, then the
    /// configured default.
    pub agent: Option<String>,
    pub skip_review: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct StartOutput {
    pub task: Task,
    pub session: String,
    pub worktree: std::path::PathBuf,
}

/// What `start` has provisioned so far; unwound in reverse on failure.
struct Provisioned<'a> {
    deps: &'a Deps,
    branch: String,
    task_id: u64,
    worktree_created: bool,
    branch_created: bool,
    script_written: bool,
    session_started: bool,
}

impl Provisioned<'_> {
    /// Named rollback sequence: stop session, remove script, remove
    /// worktree. A rollback failure is joined onto the original error.
    fn rollback(&self, original: LifecycleError) -> LifecycleError {
        warn!(
            event = "core.lifecycle.start_rollback",
            task_id = self.task_id,
            error = %original,
        );

        if self.session_started
            && let Err(e) = self.deps.sessions.stop(&session_name(self.task_id))
        {
            error!(
                event = "core.lifecycle.start_rollback_stop_failed",
                task_id = self.task_id,
                error = %e,
            );
            return original.with_rollback_failure(&e);
        }
        if self.script_written
            && let Err(e) = remove_script(&self.deps.paths.task_script(self.task_id))
        {
            return original.with_rollback_failure(&e);
        }
        if self.worktree_created
            && let Err(e) = self.deps.worktrees.remove(&self.branch)
        {
            error!(
                event = "core.lifecycle.start_rollback_remove_failed",
                task_id = self.task_id,
                branch = %self.branch,
                error = %e,
            );
            return original.with_rollback_failure(&e);
        }
        if self.branch_created {
            // The branch was born with the worktree; a branch that never
            // materialised is fine to skip.
            match self.deps.git.delete_branch(&self.branch, true) {
                Ok(()) | Err(crate::git::GitError::BranchNotFound { .. }) => {}
                Err(e) => return original.with_rollback_failure(&e),
            }
        }
        original
    }
}

pub fn start(deps: &Deps, input: &StartInput) -> Result<StartOutput, LifecycleError> {
    let mut task = deps.get_task(&input.namespace, input.task_id)?;

    if task.is_blocked() {
        return Err(LifecycleError::TaskBlocked {
            id: task.id,
            reason: task.block_reason.clone(),
        });
    }
    deps.check_transition(&task, TaskStatus::InProgress)?;

    // Agent resolution: explicit input, then the task's bound agent, then
    // the configured default.
    let agent_name = input
        .agent
        .clone()
        .or_else(|| (!task.agent.is_empty()).then(|| task.agent.clone()))
        .or_else(|| deps.config.tasks.default_agent.clone())
        .ok_or(LifecycleError::NoAgent)?;
    let agent = deps
        .config
        .agent(&agent_name)
        .map_err(LifecycleError::from_agent_lookup)?
        .clone();

    let base = deps.resolve_task_base(&task)?;
    let branch = branch_name(task.id, task.issue);

    info!(
        event = "core.lifecycle.start_started",
        task_id = task.id,
        agent = %agent_name,
        branch = %branch,
        base = %base,
    );

    let mut provisioned = Provisioned {
        deps,
        branch: branch.clone(),
        task_id: task.id,
        worktree_created: false,
        branch_created: false,
        script_written: false,
        session_started: false,
    };

    // Reuse a worktree left behind by a previous run; only remove on
    // rollback what this call created.
    let worktree = if deps.worktrees.exists(&branch)? {
        deps.worktrees.resolve(&branch)?
    } else {
        let branch_existed = deps.git.branch_exists(&branch)?;
        let path = deps.worktrees.create(&branch, &base)?;
        provisioned.worktree_created = true;
        provisioned.branch_created = !branch_existed;
        path
    };

    if let Err(e) = deps.worktrees.setup_worktree(&worktree, &deps.config.worktree) {
        return Err(provisioned.rollback(e.into()));
    }

    // Agent setup hook, rendered with task context.
    let values = template_values(&task, &worktree, &base, "");
    if let Some(ref setup) = agent.setup_script {
        let rendered = render_template(setup, &values);
        match deps.runner.run(&worktree, &rendered) {
            Ok(result) if !result.success() => {
                return Err(provisioned.rollback(LifecycleError::SetupScriptFailed {
                    exit_code: result.exit_code,
                    output: result.output,
                }));
            }
            Ok(_) => {}
            Err(e) => return Err(provisioned.rollback(e.into())),
        }
    }

    // Render prompt and command, generate the task script.
    let prompt_template = agent
        .prompt
        .as_deref()
        .unwrap_or("{{title}}\n\n{{description}}");
    let prompt = render_template(prompt_template, &values);
    let command_values = template_values(&task, &worktree, &base, "\"$CREW_PROMPT\"");
    let command = render_template(&agent.command, &command_values);

    let script_path = deps.paths.task_script(task.id);
    let script = match build_task_script(task.id, &agent.env, &prompt, &command, &deps.crew_bin) {
        Ok(script) => script,
        Err(e) => return Err(provisioned.rollback(e.into())),
    };
    if let Err(e) = write_script(&script_path, &script) {
        return Err(provisioned.rollback(e.into()));
    }
    provisioned.script_written = true;

    let session = session_name(task.id);
    let start_result = deps.sessions.start(&StartOptions {
        name: session.clone(),
        working_dir: worktree.clone(),
        command: script_path.to_string_lossy().into_owned(),
        log_path: deps.paths.session_log(&session),
        session_type: SessionType::Worker,
        task: Some(SessionTask {
            id: task.id,
            title: task.title.clone(),
            agent: agent_name.clone(),
        }),
    });
    if let Err(e) = start_result {
        return Err(provisioned.rollback(e.into()));
    }
    provisioned.session_started = true;

    // Save last so observers see either the old consistent state or the
    // new one.
    task.status = TaskStatus::InProgress;
    task.agent = agent_name;
    task.session = session.clone();
    task.started = Some(deps.now());
    if input.skip_review.is_some() {
        task.skip_review = input.skip_review;
    }
    if let Err(e) = deps.store.save(&task) {
        return Err(provisioned.rollback(e.into()));
    }

    info!(
        event = "core.lifecycle.start_completed",
        task_id = task.id,
        session = %session,
    );
    Ok(StartOutput {
        task,
        session,
        worktree,
    })
}

fn template_values<'a>(
    task: &Task,
    worktree: &std::path::Path,
    base: &str,
    prompt: &str,
) -> BTreeMap<&'a str, String> {
    let mut values = BTreeMap::new();
    values.insert("task_id", task.id.to_string());
    values.insert("title", task.title.clone());
    values.insert("description", task.description.clone());
    values.insert("worktree", worktree.display().to_string());
    values.insert("base_branch", base.to_string());
    values.insert("prompt", prompt.to_string());
    values
}
