//! crew-core: task lifecycle orchestration for AI coding agents.
//!
//! A task gets an isolated git worktree on a dedicated branch, an agent
//! running inside a detachable tmux session, and a managed lifecycle from
//! `todo` through review to `done`/`closed`.
//!
//! # Main entry points
//!
//! - [`lifecycle`] - new/start/stop/complete/close/merge/copy/delete
//! - [`tasks`] - the task model and the filesystem store
//! - [`poll`] - block until a task settles
//! - [`prune`] - reconcile tasks, worktrees, and branches
//! - [`sessions`] - the tmux session manager and generated scripts
//! - [`git`] / [`worktree`] - repository adapters

pub mod cancel;
pub mod clock;
pub mod errors;
pub mod exec;
pub mod git;
pub mod lifecycle;
pub mod logging;
pub mod poll;
pub mod prune;
pub mod render;
pub mod sessions;
pub mod tasks;
pub mod worktree;

pub use cancel::CancelToken;
pub use clock::{Clock, SystemClock};
pub use errors::CrewError;
pub use exec::{CommandExecutor, CommandOutput, ScriptRunner, ShellCommand, ShellExecutor};
pub use git::{Git, GitCli, GitError};
pub use lifecycle::{Deps, LifecycleError};
pub use logging::init_logging;
pub use poll::{PollInput, PollOutput, PollStop, poll_task};
pub use prune::{PruneInput, PruneOutput, PrunePlan, prune};
pub use sessions::{SessionManager, SessionRecord, TmuxSessionManager};
pub use tasks::{
    Comment, ExecutionSubstate, FsTaskStore, Task, TaskFilter, TaskStatus, TaskStore,
};
pub use worktree::{GitWorktreeManager, WorktreeError, WorktreeManager};
