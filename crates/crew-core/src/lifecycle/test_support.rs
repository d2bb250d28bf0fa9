//! Scripted mock adapters and a pre-wired harness for use-case tests.
//!
//! Public (not test-gated) so downstream crates can exercise the
//! lifecycle against the same mocks.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crew_config::{AgentConfig, Config};
use crew_paths::CrewPaths;

use crate::cancel::CancelToken;
use crate::clock::fixed::FixedClock;
use crate::exec::{CommandExecutor, CommandOutput, ExecError, ScriptRunner, ShellCommand};
use crate::git::{Git, GitError};
use crate::sessions::errors::SessionError;
use crate::sessions::log::write_log_header;
use crate::sessions::tmux::SessionManager;
use crate::sessions::types::{SessionRecord, StartOptions};
use crate::tasks::{FsTaskStore, TaskStore};
use crate::worktree::{WorktreeError, WorktreeManager};

use super::deps::Deps;

#[derive(Default)]
pub struct MockGit {
    pub current: Mutex<String>,
    pub default: Mutex<String>,
    pub branches: Mutex<BTreeSet<String>>,
    pub dirty_paths: Mutex<BTreeSet<PathBuf>>,
    /// `(branch, base) -> conflicting files`; empty map means clean.
    pub conflicts: Mutex<BTreeMap<(String, String), Vec<String>>>,
    pub merged: Mutex<Vec<(String, bool)>>,
    pub deleted: Mutex<Vec<(String, bool)>>,
    /// When set, `merge` fails with this conflict message.
    pub merge_conflict: Mutex<Option<String>>,
    /// Branches whose deletion is scripted to fail.
    pub fail_delete: Mutex<BTreeSet<String>>,
}

impl MockGit {
    pub fn with_branches(current: &str, default: &str) -> Self {
        let git = Self::default();
        *git.current.lock().unwrap() = current.to_string();
        *git.default.lock().unwrap() = default.to_string();
        git.branches.lock().unwrap().insert(current.to_string());
        git.branches.lock().unwrap().insert(default.to_string());
        git
    }

    pub fn set_conflict(&self, branch: &str, base: &str, files: &[&str]) {
        self.conflicts.lock().unwrap().insert(
            (branch.to_string(), base.to_string()),
            files.iter().map(|f| f.to_string()).collect(),
        );
    }
}

impl Git for MockGit {
    fn current_branch(&self) -> Result<String, GitError> {
        Ok(self.current.lock().unwrap().clone())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        Ok(self.branches.lock().unwrap().contains(branch))
    }

    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, GitError> {
        Ok(self.dirty_paths.lock().unwrap().contains(path))
    }

    fn has_merge_conflict(&self, branch: &str, base: &str) -> Result<bool, GitError> {
        Ok(!self.merge_conflict_files(branch, base)?.is_empty())
    }

    fn merge_conflict_files(&self, branch: &str, base: &str) -> Result<Vec<String>, GitError> {
        Ok(self
            .conflicts
            .lock()
            .unwrap()
            .get(&(branch.to_string(), base.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn merge(&self, branch: &str, no_ff: bool) -> Result<(), GitError> {
        if let Some(message) = self.merge_conflict.lock().unwrap().clone() {
            return Err(GitError::MergeConflict { message });
        }
        self.merged.lock().unwrap().push((branch.to_string(), no_ff));
        Ok(())
    }

    fn delete_branch(&self, branch: &str, force: bool) -> Result<(), GitError> {
        if self.fail_delete.lock().unwrap().contains(branch) {
            return Err(GitError::OperationFailed {
                message: format!("scripted delete failure for '{branch}'"),
            });
        }
        if !self.branches.lock().unwrap().remove(branch) {
            return Err(GitError::BranchNotFound {
                branch: branch.to_string(),
            });
        }
        self.deleted.lock().unwrap().push((branch.to_string(), force));
        Ok(())
    }

    fn list_branches(&self) -> Result<Vec<String>, GitError> {
        Ok(self.branches.lock().unwrap().iter().cloned().collect())
    }

    fn default_branch(&self) -> Result<String, GitError> {
        Ok(self.default.lock().unwrap().clone())
    }

    fn user_email(&self) -> Result<String, GitError> {
        Ok("dev@example.com".to_string())
    }

    fn fetch(&self, _remote: &str, _branch: &str) -> Result<(), GitError> {
        Ok(())
    }

    fn push(&self, _remote: &str, _branch: &str) -> Result<(), GitError> {
        Ok(())
    }
}

pub struct MockWorktrees {
    pub base: PathBuf,
    pub existing: Mutex<BTreeMap<String, PathBuf>>,
    pub created: Mutex<Vec<(String, String)>>,
    pub removed: Mutex<Vec<String>>,
    pub setup_paths: Mutex<Vec<PathBuf>>,
    pub fail_create: Mutex<bool>,
    pub fail_setup: Mutex<bool>,
}

impl MockWorktrees {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            existing: Mutex::new(BTreeMap::new()),
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            setup_paths: Mutex::new(Vec::new()),
            fail_create: Mutex::new(false),
            fail_setup: Mutex::new(false),
        }
    }

    /// Register a pre-existing worktree on disk.
    pub fn seed(&self, branch: &str) -> PathBuf {
        let path = self.base.join(branch);
        std::fs::create_dir_all(&path).unwrap();
        self.existing
            .lock()
            .unwrap()
            .insert(branch.to_string(), path.clone());
        path
    }
}

impl WorktreeManager for MockWorktrees {
    fn exists(&self, branch: &str) -> Result<bool, WorktreeError> {
        Ok(self.existing.lock().unwrap().contains_key(branch))
    }

    fn create(&self, branch: &str, base_ref: &str) -> Result<PathBuf, WorktreeError> {
        if *self.fail_create.lock().unwrap() {
            return Err(WorktreeError::GitFailed {
                message: "scripted create failure".to_string(),
            });
        }
        let path = self.base.join(branch);
        std::fs::create_dir_all(&path)?;
        self.existing
            .lock()
            .unwrap()
            .insert(branch.to_string(), path.clone());
        self.created
            .lock()
            .unwrap()
            .push((branch.to_string(), base_ref.to_string()));
        Ok(path)
    }

    fn resolve(&self, branch: &str) -> Result<PathBuf, WorktreeError> {
        self.existing
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| WorktreeError::NotFound {
                branch: branch.to_string(),
            })
    }

    fn remove(&self, branch: &str) -> Result<(), WorktreeError> {
        if let Some(path) = self.existing.lock().unwrap().remove(branch) {
            let _ = std::fs::remove_dir_all(path);
        }
        self.removed.lock().unwrap().push(branch.to_string());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, WorktreeError> {
        Ok(self.existing.lock().unwrap().keys().cloned().collect())
    }

    fn setup_worktree(
        &self,
        path: &Path,
        _config: &crew_config::WorktreeConfig,
    ) -> Result<(), WorktreeError> {
        if *self.fail_setup.lock().unwrap() {
            return Err(WorktreeError::HookFailed {
                exit_code: 1,
                output: "scripted setup failure".to_string(),
            });
        }
        self.setup_paths.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockSessions {
    pub running: Mutex<BTreeSet<String>>,
    pub started: Mutex<Vec<StartOptions>>,
    pub stopped: Mutex<Vec<String>>,
    pub fail_start: Mutex<bool>,
    /// Bodies the "session" writes to its log while running, one per
    /// `start` call (FIFO). Appended when `wait` observes the session end,
    /// mirroring a real session whose output lands after start returns.
    pub log_bodies: Mutex<VecDeque<String>>,
    pending_output: Mutex<BTreeMap<String, (PathBuf, String)>>,
}

impl MockSessions {
    pub fn queue_log_body(&self, body: &str) {
        self.log_bodies.lock().unwrap().push_back(body.to_string());
    }

    pub fn set_running(&self, name: &str) {
        self.running.lock().unwrap().insert(name.to_string());
    }
}

impl SessionManager for MockSessions {
    fn start(&self, options: &StartOptions) -> Result<SessionRecord, SessionError> {
        if *self.fail_start.lock().unwrap() {
            return Err(SessionError::TmuxFailed {
                message: "scripted start failure".to_string(),
            });
        }
        write_log_header(
            &options.log_path,
            &options.name,
            "2026-02-01T10:00:00Z",
            &options.working_dir,
            &options.command,
        )?;
        let log_offset = crate::sessions::log::log_len(&options.log_path);
        if let Some(body) = self.log_bodies.lock().unwrap().pop_front() {
            self.pending_output
                .lock()
                .unwrap()
                .insert(options.name.clone(), (options.log_path.clone(), body));
        }
        self.running.lock().unwrap().insert(options.name.clone());
        self.started.lock().unwrap().push(options.clone());
        Ok(SessionRecord {
            name: options.name.clone(),
            working_dir: options.working_dir.clone(),
            command: options.command.clone(),
            started_at: "2026-02-01T10:00:00Z".to_string(),
            session_type: options.session_type,
            log_offset,
            task: options.task.clone(),
        })
    }

    fn stop(&self, name: &str) -> Result<(), SessionError> {
        let was_running = self.running.lock().unwrap().remove(name);
        self.stopped.lock().unwrap().push(name.to_string());
        if was_running {
            Ok(())
        } else {
            Err(SessionError::NoSession {
                name: name.to_string(),
            })
        }
    }

    fn is_running(&self, name: &str) -> Result<bool, SessionError> {
        Ok(self.running.lock().unwrap().contains(name))
    }

    fn peek(&self, name: &str, _lines: u32, _with_escapes: bool) -> Result<String, SessionError> {
        if !self.is_running(name)? {
            return Err(SessionError::NoSession {
                name: name.to_string(),
            });
        }
        Ok(String::new())
    }

    fn wait(&self, token: &CancelToken, name: &str) -> Result<(), SessionError> {
        if token.is_cancelled() {
            return Err(SessionError::WaitCancelled {
                name: name.to_string(),
            });
        }
        if let Some((log_path, body)) = self.pending_output.lock().unwrap().remove(name) {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&log_path)?;
            file.write_all(body.as_bytes())?;
        }
        self.running.lock().unwrap().remove(name);
        Ok(())
    }

    fn send(&self, name: &str, _keys: &[&str]) -> Result<(), SessionError> {
        if !self.is_running(name)? {
            return Err(SessionError::NoSession {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockExecutor {
    pub calls: Mutex<Vec<ShellCommand>>,
    pub results: Mutex<VecDeque<CommandOutput>>,
}

impl MockExecutor {
    pub fn queue_result(&self, exit_code: i32, output: &str) {
        self.results.lock().unwrap().push_back(CommandOutput {
            exit_code,
            output: output.to_string(),
        });
    }
}

impl CommandExecutor for MockExecutor {
    fn execute(&self, cmd: &ShellCommand) -> Result<CommandOutput, ExecError> {
        self.calls.lock().unwrap().push(cmd.clone());
        Ok(self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CommandOutput {
                exit_code: 0,
                output: String::new(),
            }))
    }

    fn execute_with_cancel(
        &self,
        token: &CancelToken,
        cmd: &ShellCommand,
    ) -> Result<CommandOutput, ExecError> {
        if token.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        self.execute(cmd)
    }
}

#[derive(Default)]
pub struct MockRunner {
    pub calls: Mutex<Vec<(PathBuf, String)>>,
    pub fail: Mutex<bool>,
}

impl ScriptRunner for MockRunner {
    fn run(&self, dir: &Path, body: &str) -> Result<CommandOutput, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((dir.to_path_buf(), body.to_string()));
        if *self.fail.lock().unwrap() {
            Ok(CommandOutput {
                exit_code: 1,
                output: "scripted hook failure".to_string(),
            })
        } else {
            Ok(CommandOutput {
                exit_code: 0,
                output: String::new(),
            })
        }
    }
}

/// Store wrapper that fails saves once armed. Delegates everything else.
pub struct FailingSaveStore {
    pub inner: Arc<FsTaskStore>,
    pub fail_saves: Mutex<bool>,
}

impl FailingSaveStore {
    pub fn new(inner: Arc<FsTaskStore>) -> Self {
        Self {
            inner,
            fail_saves: Mutex::new(false),
        }
    }

    pub fn arm(&self) {
        *self.fail_saves.lock().unwrap() = true;
    }
}

impl crate::tasks::TaskStore for FailingSaveStore {
    fn get(&self, ns: &str, id: u64) -> Result<Option<crate::tasks::Task>, crate::tasks::TaskError> {
        self.inner.get(ns, id)
    }

    fn save(&self, task: &crate::tasks::Task) -> Result<(), crate::tasks::TaskError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(crate::tasks::TaskError::IoError {
                source: std::io::Error::other("scripted save failure"),
            });
        }
        self.inner.save(task)
    }

    fn next_id(&self, ns: &str) -> Result<u64, crate::tasks::TaskError> {
        self.inner.next_id(ns)
    }

    fn list(
        &self,
        ns: &str,
        filter: &crate::tasks::TaskFilter,
    ) -> Result<Vec<crate::tasks::Task>, crate::tasks::TaskError> {
        self.inner.list(ns, filter)
    }

    fn list_all(
        &self,
        filter: &crate::tasks::TaskFilter,
    ) -> Result<Vec<crate::tasks::Task>, crate::tasks::TaskError> {
        self.inner.list_all(filter)
    }

    fn get_children(
        &self,
        ns: &str,
        id: u64,
    ) -> Result<Vec<crate::tasks::Task>, crate::tasks::TaskError> {
        self.inner.get_children(ns, id)
    }

    fn delete(&self, ns: &str, id: u64) -> Result<(), crate::tasks::TaskError> {
        self.inner.delete(ns, id)
    }

    fn add_comment(
        &self,
        ns: &str,
        id: u64,
        comment: crate::tasks::Comment,
    ) -> Result<(), crate::tasks::TaskError> {
        self.inner.add_comment(ns, id, comment)
    }

    fn get_comments(
        &self,
        ns: &str,
        id: u64,
    ) -> Result<Vec<crate::tasks::Comment>, crate::tasks::TaskError> {
        self.inner.get_comments(ns, id)
    }

    fn update_comment(
        &self,
        ns: &str,
        id: u64,
        index: usize,
        comment: crate::tasks::Comment,
    ) -> Result<(), crate::tasks::TaskError> {
        self.inner.update_comment(ns, id, index, comment)
    }

    fn save_task_with_comments(
        &self,
        task: &crate::tasks::Task,
        comments: &[crate::tasks::Comment],
    ) -> Result<(), crate::tasks::TaskError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(crate::tasks::TaskError::IoError {
                source: std::io::Error::other("scripted save failure"),
            });
        }
        self.inner.save_task_with_comments(task, comments)
    }

    fn snapshot(&self, label: &str) -> Result<(), crate::tasks::TaskError> {
        self.inner.snapshot(label)
    }

    fn restore(&self, label: &str) -> Result<(), crate::tasks::TaskError> {
        self.inner.restore(label)
    }

    fn prune_snapshots(&self, keep: usize) -> Result<usize, crate::tasks::TaskError> {
        self.inner.prune_snapshots(keep)
    }

    fn push(&self) -> Result<(), crate::tasks::TaskError> {
        self.inner.push()
    }

    fn fetch(&self) -> Result<(), crate::tasks::TaskError> {
        self.inner.fetch()
    }

    fn list_namespaces(&self) -> Result<Vec<String>, crate::tasks::TaskError> {
        self.inner.list_namespaces()
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.agents.insert(
        "claude".to_string(),
        AgentConfig {
            command: "claude -p \"$CREW_PROMPT\"".to_string(),
            prompt: Some("Task {{task_id}}: {{title}}\n\n{{description}}".to_string()),
            ..AgentConfig::default()
        },
    );
    config.tasks.default_agent = Some("claude".to_string());
    config
}

pub struct TestHarness {
    pub tmp: tempfile::TempDir,
    pub deps: Deps,
    pub store: Arc<FailingSaveStore>,
    pub git: Arc<MockGit>,
    pub worktrees: Arc<MockWorktrees>,
    pub sessions: Arc<MockSessions>,
    pub executor: Arc<MockExecutor>,
    pub runner: Arc<MockRunner>,
    pub clock: Arc<FixedClock>,
}

pub fn harness() -> TestHarness {
    harness_with_config(test_config())
}

pub fn harness_with_config(config: Config) -> TestHarness {
    let tmp = tempfile::TempDir::new().unwrap();
    let paths = CrewPaths::from_dir(tmp.path().join("crew"));
    let store = Arc::new(FailingSaveStore::new(Arc::new(FsTaskStore::new(&paths))));
    let git = Arc::new(MockGit::with_branches("main", "main"));
    let worktrees = Arc::new(MockWorktrees::new(paths.worktrees_dir()));
    let sessions = Arc::new(MockSessions::default());
    let executor = Arc::new(MockExecutor::default());
    let runner = Arc::new(MockRunner::default());
    let clock = Arc::new(FixedClock::at(
        chrono::DateTime::parse_from_rfc3339("2026-02-01T10:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc),
    ));

    let deps = Deps {
        config,
        repo_root: tmp.path().to_path_buf(),
        paths,
        store: store.clone(),
        git: git.clone(),
        worktrees: worktrees.clone(),
        sessions: sessions.clone(),
        executor: executor.clone(),
        runner: runner.clone(),
        clock: clock.clone(),
        crew_bin: "crew".to_string(),
    };

    TestHarness {
        tmp,
        deps,
        store,
        git,
        worktrees,
        sessions,
        executor,
        runner,
        clock,
    }
}
