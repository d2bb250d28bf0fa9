//! Dispatch from parsed arguments into the core use-cases.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use crew_core::lifecycle::{self, Deps};
use crew_core::tasks::{
    FsTaskStore, StoreInitializer, TaskFilter, TaskStatus, review_session_name, session_name,
};
use crew_core::{CancelToken, GitCli, GitWorktreeManager, SessionManager, ShellExecutor,
    SystemClock, TaskStore, TmuxSessionManager};
use crew_paths::CrewPaths;

use crate::cli::{AcpCommand, Cli, Command};

type CliResult = Result<(), Box<dyn Error>>;

/// Walk up from the current directory to the repository root.
fn find_repo_root() -> Result<PathBuf, Box<dyn Error>> {
    let mut dir = std::env::current_dir()?;
    loop {
        if dir.join(".git").exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err("not inside a git repository".into());
        }
    }
}

fn build_deps(repo_root: PathBuf) -> Result<Deps, Box<dyn Error>> {
    let config = crew_config::load(&repo_root)?;
    let paths = CrewPaths::resolve(&repo_root)?;
    let clock = Arc::new(SystemClock);
    let executor = Arc::new(ShellExecutor);
    let crew_bin = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "crew".to_string());

    Ok(Deps {
        config,
        repo_root: repo_root.clone(),
        paths: paths.clone(),
        store: Arc::new(FsTaskStore::new(&paths)),
        git: Arc::new(GitCli::new(repo_root.clone())),
        worktrees: Arc::new(GitWorktreeManager::new(repo_root, &paths, executor.clone())),
        sessions: Arc::new(TmuxSessionManager::new(clock.clone())),
        executor,
        runner: Arc::new(ShellExecutor),
        clock,
        crew_bin,
    })
}

fn build_acp_deps(deps: Deps) -> crew_acp::AcpDeps {
    let paths = deps.paths.clone();
    crew_acp::AcpDeps {
        core: deps,
        state: Arc::new(crew_acp::FsAcpStateStore::new(paths.clone())),
        events: Arc::new(crew_acp::FsAcpEventWriterFactory::new(paths.clone())),
        ipc: Arc::new(crew_acp::UnixAcpIpcFactory::new(paths)),
    }
}

pub fn run(cli: Cli) -> CliResult {
    let repo_root = find_repo_root()?;
    let namespace = cli.namespace.clone();

    match cli.command {
        Command::Init => {
            let paths = CrewPaths::resolve(&repo_root)?;
            let store = FsTaskStore::new(&paths);
            let repaired = store.initialize()?;
            crew_config::write_default(&crew_config::repo_config_path(&repo_root))?;
            println!(
                "Initialized crew at {}{}",
                paths.crew_dir().display(),
                if repaired { " (repaired id sequence)" } else { "" }
            );
            Ok(())
        }

        Command::New(args) => {
            let deps = build_deps(repo_root)?;
            let output = lifecycle::new_task(
                &deps,
                &lifecycle::NewTaskInput {
                    title: args.title,
                    description: args.description,
                    parent_id: args.parent,
                    labels: args.labels,
                    issue: args.issue,
                    base_branch: args.base_branch,
                    namespace,
                    skip_review: None,
                },
            )?;
            println!("Created task {}: {}", output.task.id, output.task.title);
            Ok(())
        }

        Command::Add(args) => {
            let content = if args.file == "-" {
                use std::io::Read;
                let mut content = String::new();
                std::io::stdin().read_to_string(&mut content)?;
                content
            } else {
                std::fs::read_to_string(&args.file)?
            };

            let deps = build_deps(repo_root)?;
            let output = lifecycle::create_tasks_from_file(
                &deps,
                &lifecycle::CreateFromFileInput {
                    content,
                    namespace,
                    base_branch: args.base_branch,
                    dry_run: args.dry_run,
                },
            )?;
            for task in &output.tasks {
                let parent = task
                    .parent_id
                    .map(|id| format!(" (parent {id})"))
                    .unwrap_or_default();
                println!("{} {}{}", task.id, task.title, parent);
            }
            if args.dry_run {
                println!("(dry run: nothing created)");
            }
            Ok(())
        }

        Command::List(args) => {
            let deps = build_deps(repo_root)?;
            let filter = TaskFilter {
                status: args
                    .status
                    .as_deref()
                    .map(|s| s.parse::<TaskStatus>())
                    .transpose()?,
                label: args.label,
                parent_id: None,
            };
            let tasks = if args.all {
                deps.store.list_all(&filter)?
            } else {
                deps.store.list(&namespace, &filter)?
            };
            for task in tasks {
                let blocked = if task.is_blocked() { " [blocked]" } else { "" };
                println!(
                    "{:>4}  {:<12} {}{}",
                    task.id,
                    task.status.to_string(),
                    task.title,
                    blocked
                );
            }
            Ok(())
        }

        Command::Start(args) => {
            let deps = build_deps(repo_root)?;
            let output = lifecycle::start(
                &deps,
                &lifecycle::StartInput {
                    task_id: args.task,
                    namespace,
                    agent: args.agent,
                    skip_review: None,
                },
            )?;
            println!(
                "Started task {} in session {} ({})",
                output.task.id,
                output.session,
                output.worktree.display()
            );
            Ok(())
        }

        Command::Stop(args) => {
            let deps = build_deps(repo_root)?;
            let output = lifecycle::stop(
                &deps,
                &lifecycle::StopInput {
                    task_id: args.task,
                    namespace,
                },
            )?;
            if output.stopped_review {
                println!("Stopped review session for task {}", output.task.id);
            } else {
                println!("Stopped task {} ({})", output.task.id, output.task.status);
            }
            Ok(())
        }

        Command::Complete(args) => {
            let deps = build_deps(repo_root)?;
            let output = lifecycle::complete(
                &deps,
                &CancelToken::new(),
                &lifecycle::CompleteInput {
                    task_id: args.task,
                    namespace,
                    force_review: args.force_review,
                    comment: args.comment,
                },
            )?;
            println!(
                "Task {} done ({} review round(s))",
                output.task.id, output.reviews_run
            );
            Ok(())
        }

        Command::Close(args) => {
            let deps = build_deps(repo_root)?;
            let output = lifecycle::close(
                &deps,
                &lifecycle::CloseInput {
                    task_id: args.task,
                    namespace,
                },
            )?;
            if output.already_closed {
                println!("Task {} was already closed", output.task.id);
            } else {
                println!("Closed task {}", output.task.id);
            }
            Ok(())
        }

        Command::Merge(args) => {
            let deps = build_deps(repo_root)?;
            let output = lifecycle::merge(
                &deps,
                &lifecycle::MergeInput {
                    task_id: args.task,
                    namespace,
                    base_branch: args.base_branch,
                    close: args.close,
                },
            )?;
            println!(
                "Merged {} into {} (task {} {})",
                output.merged_branch, output.target, output.task.id, output.task.status
            );
            Ok(())
        }

        Command::Copy(args) => {
            let deps = build_deps(repo_root)?;
            let output = lifecycle::copy_task(
                &deps,
                &lifecycle::CopyInput {
                    task_id: args.task,
                    namespace,
                    title: args.title,
                    copy_all: args.all,
                },
            )?;
            println!("Created task {}: {}", output.task.id, output.task.title);
            Ok(())
        }

        Command::Delete(args) => {
            let deps = build_deps(repo_root)?;
            lifecycle::delete(
                &deps,
                &lifecycle::DeleteInput {
                    task_id: args.task,
                    namespace,
                },
            )?;
            println!("Deleted task {}", args.task);
            Ok(())
        }

        Command::Peek(args) => {
            let deps = build_deps(repo_root)?;
            let session = if args.review {
                review_session_name(args.task)
            } else {
                session_name(args.task)
            };
            let snapshot = deps.sessions.peek(&session, args.lines, args.escapes)?;
            print!("{snapshot}");
            Ok(())
        }

        Command::Poll(args) => {
            let deps = build_deps(repo_root)?;
            let expected = args
                .expected
                .iter()
                .map(|s| s.parse::<TaskStatus>())
                .collect::<Result<Vec<_>, _>>()?;
            let output = crew_core::poll_task(
                &deps,
                &CancelToken::new(),
                &crew_core::PollInput {
                    task_id: args.task,
                    namespace,
                    interval_secs: args.interval,
                    timeout_secs: args.timeout,
                    expected_statuses: expected,
                    command_template: args.on_change,
                },
            )?;
            println!("{:?}: {}", output.stop, output.last_status);
            Ok(())
        }

        Command::Prune(args) => {
            let deps = build_deps(repo_root)?;
            let output = crew_core::prune(
                &deps,
                &crew_core::PruneInput {
                    all: args.all,
                    dry_run: args.dry_run,
                },
            )?;
            for branch in &output.plan.orphan_worktrees {
                println!("worktree  {branch}");
            }
            for branch in &output.plan.orphan_branches {
                println!("branch    {branch}");
            }
            for (ns, id) in &output.plan.prunable_tasks {
                println!("task      {ns}/{id}");
            }
            for error in &output.errors {
                eprintln!("error: {error}");
            }
            if args.dry_run {
                println!("(dry run: nothing deleted)");
            }
            Ok(())
        }

        Command::Migrate(args) => {
            let deps = build_deps(repo_root)?;
            let source = FsTaskStore::from_dirs(
                args.source.clone(),
                args.source.join(".snapshots"),
            );
            let dest = FsTaskStore::new(&deps.paths);
            let report = crew_core::tasks::migrate(
                &source,
                &dest,
                &dest,
                &crew_core::tasks::MigrateOptions {
                    skip_comments: args.skip_comments,
                    strict_comments: args.strict_comments,
                },
            )?;
            println!(
                "Migrated {} task(s), skipped {}, {} comment set(s) dropped",
                report.migrated, report.skipped, report.skipped_comments
            );
            Ok(())
        }

        Command::Acp(acp) => run_acp(repo_root, namespace, acp),

        Command::SessionEnded(args) => {
            let deps = build_deps(repo_root)?;
            let output = lifecycle::session_ended(
                &deps,
                &lifecycle::SessionEndedInput {
                    task_id: args.task,
                    namespace,
                    exit_code: args.exit_code,
                },
            )?;
            if output.ignored {
                println!("ignored");
            }
            Ok(())
        }
    }
}

fn run_acp(repo_root: PathBuf, namespace: String, command: AcpCommand) -> CliResult {
    let deps = build_acp_deps(build_deps(repo_root)?);
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        match command {
            AcpCommand::Run(args) => {
                let shutdown = tokio_util::sync::CancellationToken::new();
                let ctrl_c = shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        ctrl_c.cancel();
                    }
                });

                let output = crew_acp::execute(
                    &deps,
                    shutdown,
                    &crew_acp::ExecuteInput {
                        task_id: args.task,
                        namespace,
                        agent: args.agent,
                        forward_output: true,
                    },
                )
                .await?;
                println!("\nACP session {} ended: {}", output.session_id, output.end_reason);
                Ok(())
            }
            AcpCommand::Prompt(args) => {
                send(&deps, args.task, namespace, crew_acp::AcpCommand::Prompt {
                    text: args.text,
                })
                .await
            }
            AcpCommand::Permission(args) => {
                send(&deps, args.task, namespace, crew_acp::AcpCommand::Permission {
                    option_id: args.option_id,
                })
                .await
            }
            AcpCommand::Cancel(args) => {
                send(&deps, args.task, namespace, crew_acp::AcpCommand::Cancel).await
            }
            AcpCommand::Stop(args) => {
                send(&deps, args.task, namespace, crew_acp::AcpCommand::Stop).await
            }
        }
    })
}

async fn send(
    deps: &crew_acp::AcpDeps,
    task_id: u64,
    namespace: String,
    command: crew_acp::AcpCommand,
) -> CliResult {
    crew_acp::send_command(
        deps,
        &crew_acp::ControlInput {
            task_id,
            namespace,
            command,
        },
    )
    .await?;
    Ok(())
}
