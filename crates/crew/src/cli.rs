//! Command-line surface.

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "crew", about = "Task orchestration for AI coding agents", version)]
pub struct Cli {
    /// Emit JSON logs at info level (CREW_LOG overrides).
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Task namespace.
    #[arg(long, global = true, default_value = "")]
    pub namespace: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialize the crew directory and a starter config.
    Init,
    /// Create a task.
    New(NewArgs),
    /// Create tasks from a draft file.
    Add(AddArgs),
    /// List tasks.
    List(ListArgs),
    /// Start an agent on a task.
    Start(TaskRefArgs),
    /// Stop a task's running session.
    Stop(TaskRefArgs),
    /// Run the completion gate and review, then mark done.
    Complete(CompleteArgs),
    /// Close (abandon) a task.
    Close(TaskRefArgs),
    /// Merge a task's branch into its base.
    Merge(MergeArgs),
    /// Copy a task.
    Copy(CopyArgs),
    /// Delete a task row.
    Delete(TaskRefArgs),
    /// Show the tail of a task's session output.
    Peek(PeekArgs),
    /// Block until a task settles or changes status.
    Poll(PollArgs),
    /// Reconcile tasks, worktrees, and branches.
    Prune(PruneArgs),
    /// Migrate a legacy task store into the current one.
    Migrate(MigrateArgs),
    /// Drive a task's agent over ACP.
    #[command(subcommand)]
    Acp(AcpCommand),
    /// Internal callback fired by generated task scripts.
    #[command(name = "_session-ended", hide = true)]
    SessionEnded(SessionEndedArgs),
}

#[derive(Debug, Args)]
pub struct NewArgs {
    pub title: String,
    #[arg(long, default_value = "")]
    pub description: String,
    #[arg(long)]
    pub parent: Option<u64>,
    #[arg(long = "label")]
    pub labels: Vec<String>,
    #[arg(long, default_value_t = 0)]
    pub issue: u64,
    #[arg(long)]
    pub base_branch: Option<String>,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Draft file; `-` reads stdin.
    pub file: String,
    #[arg(long)]
    pub base_branch: Option<String>,
    /// Parse and validate without creating anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub label: Option<String>,
    /// List tasks from every namespace.
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct TaskRefArgs {
    pub task: u64,
    /// Agent override (start only).
    #[arg(long)]
    pub agent: Option<String>,
}

#[derive(Debug, Args)]
pub struct CompleteArgs {
    pub task: u64,
    #[arg(long)]
    pub force_review: bool,
    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    pub task: u64,
    #[arg(long)]
    pub base_branch: Option<String>,
    /// Record the merged task as closed instead of done.
    #[arg(long)]
    pub close: bool,
}

#[derive(Debug, Args)]
pub struct CopyArgs {
    pub task: u64,
    #[arg(long)]
    pub title: Option<String>,
    /// Also copy comments and provision a worktree.
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct PeekArgs {
    pub task: u64,
    #[arg(long, default_value_t = 40)]
    pub lines: u32,
    /// Keep terminal escape sequences in the snapshot.
    #[arg(long)]
    pub escapes: bool,
    /// Peek the review session instead of the worker.
    #[arg(long)]
    pub review: bool,
}

#[derive(Debug, Args)]
pub struct PollArgs {
    pub task: u64,
    #[arg(long, default_value_t = 10)]
    pub interval: u64,
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Statuses the task is expected to stay in.
    #[arg(long = "expect")]
    pub expected: Vec<String>,
    /// Command run on each status change; placeholders {{task_id}},
    /// {{old_status}}, {{new_status}}.
    #[arg(long)]
    pub on_change: Option<String>,
}

#[derive(Debug, Args)]
pub struct PruneArgs {
    /// Also prune done tasks.
    #[arg(long)]
    pub all: bool,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Root of the legacy task store.
    pub source: std::path::PathBuf,
    #[arg(long)]
    pub skip_comments: bool,
    #[arg(long)]
    pub strict_comments: bool,
}

#[derive(Debug, Subcommand)]
pub enum AcpCommand {
    /// Spawn the agent and run the ACP loop in the foreground.
    Run(TaskRefArgs),
    /// Send a prompt to a running ACP loop.
    Prompt(AcpPromptArgs),
    /// Answer a pending permission request.
    Permission(AcpPermissionArgs),
    /// Cancel the current turn.
    Cancel(AcpTaskArgs),
    /// Stop the ACP loop.
    Stop(AcpTaskArgs),
}

#[derive(Debug, Args)]
pub struct AcpTaskArgs {
    pub task: u64,
}

#[derive(Debug, Args)]
pub struct AcpPromptArgs {
    pub task: u64,
    pub text: String,
}

#[derive(Debug, Args)]
pub struct AcpPermissionArgs {
    pub task: u64,
    pub option_id: String,
}

#[derive(Debug, Args)]
pub struct SessionEndedArgs {
    #[arg(long)]
    pub task: u64,
    #[arg(long)]
    pub exit_code: i32,
}
