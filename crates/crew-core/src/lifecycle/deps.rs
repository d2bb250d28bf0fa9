//! The adapter aggregate lifecycle use-cases run against.

use std::sync::Arc;

use crew_config::Config;
use crew_paths::CrewPaths;

use crate::clock::Clock;
use crate::exec::{CommandExecutor, ScriptRunner};
use crate::git::Git;
use crate::sessions::SessionManager;
use crate::tasks::TaskStore;
use crate::worktree::WorktreeManager;

use super::errors::LifecycleError;
use crate::tasks::{Task, TaskStatus};

/// Everything a lifecycle use-case touches. The `config` field is an
/// immutable snapshot taken when the aggregate was built; use-cases read
/// the snapshot, never the loader.
pub struct Deps {
    pub config: Config,
    pub paths: CrewPaths,
    /// Root of the parent repository the tasks belong to.
    pub repo_root: std::path::PathBuf,
    pub store: Arc<dyn TaskStore>,
    pub git: Arc<dyn Git>,
    pub worktrees: Arc<dyn WorktreeManager>,
    pub sessions: Arc<dyn SessionManager>,
    pub executor: Arc<dyn CommandExecutor>,
    pub runner: Arc<dyn ScriptRunner>,
    pub clock: Arc<dyn Clock>,
    /// Binary the generated scripts call back into for `_session-ended`.
    pub crew_bin: String,
}

impl Deps {
    pub fn now(&self) -> String {
        crate::clock::format_rfc3339(self.clock.now())
    }

    pub fn get_task(&self, namespace: &str, id: u64) -> Result<Task, LifecycleError> {
        self.store
            .get(namespace, id)?
            .ok_or(LifecycleError::TaskNotFound { id })
    }

    /// Base branch for an existing task: the stored branch verbatim when
    /// set, the repository default otherwise.
    pub fn resolve_task_base(&self, task: &Task) -> Result<String, LifecycleError> {
        if !task.base_branch.is_empty() {
            return Ok(task.base_branch.clone());
        }
        Ok(self.git.default_branch()?)
    }

    /// Base branch for a task being created. Priority: explicit input,
    /// configured `new_task_base` policy, git current branch, git default.
    pub fn resolve_new_task_base(
        &self,
        explicit: Option<&str>,
    ) -> Result<String, LifecycleError> {
        if let Some(base) = explicit
            && !base.is_empty()
        {
            return Ok(base.to_string());
        }
        match self.config.tasks.new_task_base {
            crew_config::NewTaskBase::Current => match self.git.current_branch() {
                Ok(branch) => Ok(branch),
                Err(crate::git::GitError::DetachedHead) => Ok(self.git.default_branch()?),
                Err(e) => Err(e.into()),
            },
            crew_config::NewTaskBase::Default => Ok(self.git.default_branch()?),
        }
    }

    /// Guard a status transition, surfacing `InvalidTransition` unchanged.
    pub fn check_transition(
        &self,
        task: &Task,
        to: TaskStatus,
    ) -> Result<(), LifecycleError> {
        if crate::tasks::transition_allowed(task.status, to) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                from: task.status,
                to,
            })
        }
    }
}
