//! The ACP runtime: spawn an agent as a long-lived JSON-RPC subprocess and
//! drive it from the per-task IPC channel.
//!
//! One `execute` call owns the child process, the connection, and the
//! event writer for its whole lifetime. The main loop is a cooperative
//! multiplex over the command channels, the child's exit, the connection's
//! closure, and the caller's cancellation; `session_end` is latched to
//! fire exactly once per run.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crew_core::exec::ScriptRunner;
use crew_core::git::Git;
use crew_core::lifecycle::Deps;
use crew_core::render::render_template;
use crew_core::sessions::script::{build_acp_script, validate_env_name, write_script};
use crew_core::tasks::{
    ExecutionSubstate, TaskStatus, TaskStore, acp_session_name, branch_name,
};
use crew_core::worktree::WorktreeManager;

use crate::connection::{AgentConnection, InboundPermission};
use crate::errors::AcpError;
use crate::events::{AcpEvent, AcpEventWriter, AcpEventWriterFactory};
use crate::ipc::AcpIpcFactory;
use crate::protocol::{
    PermissionOutcome, PromptResult, RequestPermissionResult, SessionUpdateParams, StopReason,
};
use crate::router::{RouterChannels, spawn_router};
use crate::state::{AcpExecutionState, AcpStateStore};

/// Adapter aggregate for the ACP path: the core lifecycle adapters plus
/// the ACP-specific stores and channels.
pub struct AcpDeps {
    pub core: Deps,
    pub state: Arc<dyn AcpStateStore>,
    pub events: Arc<dyn AcpEventWriterFactory>,
    pub ipc: Arc<dyn AcpIpcFactory>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteInput {
    pub task_id: u64,
    pub namespace: String,
    /// Agent override; same fallbacks as `start`.
    pub agent: Option<String>,
    /// Echo agent message chunks to stdout for interactive use.
    pub forward_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOutput {
    pub session_id: String,
    /// Reason recorded on the final `session_end` event.
    pub end_reason: &'static str,
}

struct EventSink {
    writer: Arc<dyn AcpEventWriter>,
    clock: Arc<dyn crew_core::Clock>,
    session_id: String,
}

impl EventSink {
    fn emit(&self, event_type: &str, payload: serde_json::Value) {
        let event = AcpEvent::new(
            crew_core::clock::format_rfc3339(self.clock.now()),
            event_type,
            self.session_id.clone(),
            payload,
        );
        if let Err(e) = self.writer.write(&event) {
            warn!(event = "acp.runtime.event_write_failed", error = %e);
        }
    }
}

/// Emits `session_end` at most once per run.
struct SessionEndLatch {
    fired: bool,
}

impl SessionEndLatch {
    fn new() -> Self {
        Self { fired: false }
    }

    fn fire(&mut self, sink: &EventSink, reason: &str, mut payload: serde_json::Value) {
        if self.fired {
            return;
        }
        self.fired = true;
        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "reason".to_string(),
                serde_json::Value::String(reason.to_string()),
            );
        }
        sink.emit("session_end", payload);
    }
}

/// Await the in-flight prompt turn, or park forever when none is running.
/// Used as a select arm guarded by `inflight.is_some()`.
async fn await_inflight(
    inflight: &mut Option<BoxFuture<'static, Result<PromptResult, AcpError>>>,
) -> Result<PromptResult, AcpError> {
    match inflight.as_mut() {
        Some(turn) => turn.await,
        None => std::future::pending().await,
    }
}

pub async fn execute(
    deps: &AcpDeps,
    shutdown: CancellationToken,
    input: &ExecuteInput,
) -> Result<ExecuteOutput, AcpError> {
    let core = &deps.core;
    let mut task = core
        .store
        .get(&input.namespace, input.task_id)?
        .ok_or(crew_core::LifecycleError::TaskNotFound { id: input.task_id })?;

    if task.is_blocked() {
        return Err(crew_core::LifecycleError::TaskBlocked {
            id: task.id,
            reason: task.block_reason.clone(),
        }
        .into());
    }
    if !crew_core::tasks::transition_allowed(task.status, TaskStatus::InProgress) {
        return Err(crew_core::LifecycleError::InvalidTransition {
            from: task.status,
            to: TaskStatus::InProgress,
        }
        .into());
    }

    // Same agent taxonomy as `start`.
    let agent_name = input
        .agent
        .clone()
        .or_else(|| (!task.agent.is_empty()).then(|| task.agent.clone()))
        .or_else(|| core.config.tasks.default_agent.clone())
        .ok_or(crew_core::LifecycleError::NoAgent)?;
    let agent = core
        .config
        .agent(&agent_name)
        .map_err(crew_core::LifecycleError::from_agent_lookup)?
        .clone();

    // Same create-setup-rollback as `start`.
    let base = core.resolve_task_base(&task)?;
    let branch = branch_name(task.id, task.issue);
    let mut worktree_created = false;
    let mut branch_created = false;
    let worktree = if core.worktrees.exists(&branch)? {
        core.worktrees.resolve(&branch)?
    } else {
        let branch_existed = core.git.branch_exists(&branch)?;
        let path = core.worktrees.create(&branch, &base)?;
        worktree_created = true;
        branch_created = !branch_existed;
        path
    };

    let rollback_worktree = |original: AcpError| -> AcpError {
        if worktree_created
            && let Err(e) = core.worktrees.remove(&branch)
        {
            error!(
                event = "acp.runtime.rollback_failed",
                branch = %branch,
                error = %e,
            );
            return AcpError::SaveFailed {
                message: crew_core::errors::join_rollback_error(&original, &e),
            };
        }
        if branch_created {
            match core.git.delete_branch(&branch, true) {
                Ok(()) | Err(crew_core::GitError::BranchNotFound { .. }) => {}
                Err(e) => {
                    return AcpError::SaveFailed {
                        message: crew_core::errors::join_rollback_error(&original, &e),
                    };
                }
            }
        }
        original
    };

    if let Err(e) = core.worktrees.setup_worktree(&worktree, &core.config.worktree) {
        return Err(rollback_worktree(e.into()));
    }
    if let Some(ref setup) = agent.setup_script {
        let mut values = BTreeMap::new();
        values.insert("task_id", task.id.to_string());
        values.insert("title", task.title.clone());
        values.insert("worktree", worktree.display().to_string());
        let rendered = render_template(setup, &values);
        match core.runner.run(&worktree, &rendered) {
            Ok(result) if !result.success() => {
                return Err(rollback_worktree(
                    crew_core::LifecycleError::SetupScriptFailed {
                        exit_code: result.exit_code,
                        output: result.output,
                    }
                    .into(),
                ));
            }
            Ok(_) => {}
            Err(e) => return Err(rollback_worktree(crew_core::LifecycleError::from(e).into())),
        }
    }

    // Validate the agent env before anything is spawned; the BTreeMap
    // keeps the keys deterministically sorted.
    for key in agent.env.keys() {
        if let Err(e) = validate_env_name(key) {
            return Err(rollback_worktree(e.into()));
        }
    }

    let mut values = BTreeMap::new();
    values.insert("task_id", task.id.to_string());
    values.insert("title", task.title.clone());
    values.insert("description", task.description.clone());
    values.insert("worktree", worktree.display().to_string());
    values.insert("base_branch", base.clone());
    values.insert("prompt", String::new());
    let command = render_template(&agent.command, &values);

    // Spawn record for operators.
    match build_acp_script(&agent.env, &command) {
        Ok(script) => {
            if let Err(e) = write_script(&core.paths.acp_script(task.id), &script) {
                return Err(rollback_worktree(e.into()));
            }
        }
        Err(e) => return Err(rollback_worktree(e.into())),
    }

    info!(
        event = "acp.runtime.spawn_started",
        task_id = task.id,
        agent = %agent_name,
        command = %command,
    );

    let mut child = match tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(&worktree)
        .envs(agent.env.iter())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return Err(rollback_worktree(AcpError::SpawnFailed {
                message: e.to_string(),
            }));
        }
    };

    let stdin = child.stdin.take().ok_or(AcpError::SpawnFailed {
        message: "child stdin not piped".to_string(),
    })?;
    let stdout = child.stdout.take().ok_or(AcpError::SpawnFailed {
        message: "child stdout not piped".to_string(),
    })?;

    let (conn, events) = AgentConnection::new(stdout, stdin);
    let conn_closed = conn.closed();

    // Everything spawned for this run dies with this guard.
    let run_token = CancellationToken::new();
    let _run_guard = run_token.clone().drop_guard();

    // Watch the child's exit; dropping the child on run teardown kills a
    // still-running agent (kill_on_drop).
    let (exit_tx, mut exit_rx) = oneshot::channel::<Option<i32>>();
    {
        let watcher_token = run_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let code = status.map(|s| s.code()).unwrap_or(None);
                    let _ = exit_tx.send(code);
                }
                _ = watcher_token.cancelled() => {}
            }
        });
    }

    // Handshake.
    if let Err(e) = conn.initialize().await {
        return Err(rollback_worktree(e));
    }
    let session = match conn.new_session(&worktree.to_string_lossy()).await {
        Ok(session) => session,
        Err(e) => return Err(rollback_worktree(e)),
    };
    let session_id = session.session_id;

    let writer: Arc<dyn AcpEventWriter> =
        Arc::from(deps.events.for_task(&input.namespace, input.task_id)?);
    let sink = Arc::new(EventSink {
        writer: writer.clone(),
        clock: core.clock.clone(),
        session_id: session_id.clone(),
    });

    // Persist the running substate, then bind the task. A failed task save
    // resets the substate so observers never see a half-started run.
    deps.state.save(
        &input.namespace,
        input.task_id,
        &AcpExecutionState::new(ExecutionSubstate::Running, &session_id, &core.now()),
    )?;

    task.status = TaskStatus::InProgress;
    task.agent = agent_name.clone();
    task.session = acp_session_name(task.id);
    task.started = Some(core.now());
    task.execution_substate = ExecutionSubstate::Running;
    if let Err(save_err) = core.store.save(&task) {
        let reset = deps.state.save(
            &input.namespace,
            input.task_id,
            &AcpExecutionState::new(ExecutionSubstate::Idle, &session_id, &core.now()),
        );
        let original: AcpError = save_err.into();
        return Err(match reset {
            Ok(()) => original,
            Err(reset_err) => AcpError::SaveFailed {
                message: crew_core::errors::join_rollback_error(&original, &reset_err),
            },
        });
    }

    let ipc = deps.ipc.for_task(&input.namespace, input.task_id)?;
    let RouterChannels {
        mut prompt_rx,
        permission_rx,
        mut cancel_rx,
        stop,
        mut error_rx,
    } = spawn_router(ipc, run_token.clone());

    spawn_permission_pump(
        deps.state.clone(),
        sink.clone(),
        core.clock.clone(),
        input.namespace.clone(),
        input.task_id,
        session_id.clone(),
        events.permissions_rx,
        permission_rx,
        stop.clone(),
        shutdown.clone(),
        run_token.clone(),
    );

    spawn_update_forwarder(
        sink.clone(),
        events.updates_rx,
        input.forward_output,
        run_token.clone(),
    );

    // --- Main loop ---

    let mut latch = SessionEndLatch::new();
    let mut cancel_sent = false;
    let mut inflight: Option<BoxFuture<'static, Result<PromptResult, AcpError>>> = None;
    // Select guards must not touch `inflight` itself while its future is
    // borrowed by an arm; this flag mirrors `inflight.is_some()`.
    let mut turn_active = false;
    // Once the router exits its channels drain to None; disable those arms
    // instead of spinning on a closed receiver.
    let mut prompt_open = true;
    let mut cancel_open = true;
    let mut error_open = true;

    let set_substate = |substate: ExecutionSubstate| {
        let now = core.now();
        if let Err(e) = deps.state.save(
            &input.namespace,
            input.task_id,
            &AcpExecutionState::new(substate, &session_id, &now),
        ) {
            warn!(event = "acp.runtime.substate_save_failed", error = %e);
        }
    };

    let mark_task_error = || {
        match core.store.get(&input.namespace, input.task_id) {
            Ok(Some(mut fresh)) => {
                fresh.status = TaskStatus::Error;
                fresh.agent.clear();
                fresh.session.clear();
                fresh.execution_substate = ExecutionSubstate::Idle;
                if let Err(e) = core.store.save(&fresh) {
                    warn!(event = "acp.runtime.error_save_failed", error = %e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(event = "acp.runtime.error_save_failed", error = %e),
        }
    };

    let result = loop {
        tokio::select! {
            turn = await_inflight(&mut inflight), if turn_active => {
                inflight = None;
                turn_active = false;
                match turn {
                    Ok(prompt_result) => {
                        if prompt_result.stop_reason == StopReason::EndTurn {
                            // Turn done: wait for the user's next move,
                            // keeping the session id.
                            set_substate(ExecutionSubstate::AwaitingUser);
                        }
                    }
                    Err(e) => {
                        // Connection failures also wake the closed branch,
                        // which classifies the outcome.
                        warn!(event = "acp.runtime.prompt_failed", error = %e);
                    }
                }
            }

            text = prompt_rx.recv(), if !turn_active && prompt_open => {
                let Some(text) = text else {
                    prompt_open = false;
                    continue;
                };
                sink.emit("prompt_sent", serde_json::json!({ "text": text }));
                set_substate(ExecutionSubstate::Running);
                let conn = conn.clone();
                let sid = session_id.clone();
                inflight = Some(Box::pin(async move { conn.prompt(&sid, &text).await }));
                turn_active = true;
            }

            cancel = cancel_rx.recv(), if cancel_open => {
                let Some(()) = cancel else {
                    cancel_open = false;
                    continue;
                };
                cancel_sent = true;
                if let Err(e) = conn.cancel(&session_id).await {
                    warn!(event = "acp.runtime.cancel_failed", error = %e);
                }
                // Cancel does not end the run.
            }

            _ = stop.cancelled() => {
                if let Err(e) = conn.cancel(&session_id).await {
                    warn!(event = "acp.runtime.cancel_failed", error = %e);
                }
                latch.fire(&sink, "stop", serde_json::json!({}));
                set_substate(ExecutionSubstate::Idle);
                info!(event = "acp.runtime.stopped", task_id = input.task_id);
                break Ok(ExecuteOutput {
                    session_id: session_id.clone(),
                    end_reason: "stop",
                });
            }

            router_err = error_rx.recv(), if error_open => {
                // A closed error channel is the router's normal exit, not
                // a failure.
                let Some(router_err) = router_err else {
                    error_open = false;
                    continue;
                };
                let message = router_err.to_string();
                latch.fire(&sink, "router_error", serde_json::json!({ "error": message }));
                mark_task_error();
                set_substate(ExecutionSubstate::Idle);
                break Err(AcpError::RouterError { message });
            }

            code = &mut exit_rx => {
                let code = code.unwrap_or(None);
                if cancel_sent || code == Some(0) {
                    latch.fire(&sink, "process_exit", serde_json::json!({ "code": code }));
                    set_substate(ExecutionSubstate::Idle);
                    break Ok(ExecuteOutput {
                        session_id: session_id.clone(),
                        end_reason: "process_exit",
                    });
                }
                latch.fire(&sink, "process_error", serde_json::json!({ "code": code }));
                mark_task_error();
                set_substate(ExecutionSubstate::Idle);
                break Err(AcpError::ProcessExited { code });
            }

            _ = conn_closed.cancelled() => {
                // Give the child a moment to report its exit so a crashed
                // process reads as process_error, not a bare closure.
                let exit = tokio::time::timeout(
                    std::time::Duration::from_millis(500),
                    &mut exit_rx,
                )
                .await;
                match exit {
                    Ok(Ok(code)) if !cancel_sent && code != Some(0) => {
                        latch.fire(&sink, "process_error", serde_json::json!({ "code": code }));
                        mark_task_error();
                        set_substate(ExecutionSubstate::Idle);
                        break Err(AcpError::ProcessExited { code });
                    }
                    Ok(_) => {
                        latch.fire(&sink, "process_exit", serde_json::json!({}));
                        set_substate(ExecutionSubstate::Idle);
                        break Ok(ExecuteOutput {
                            session_id: session_id.clone(),
                            end_reason: "process_exit",
                        });
                    }
                    Err(_) => {
                        latch.fire(&sink, "connection_closed", serde_json::json!({}));
                        mark_task_error();
                        set_substate(ExecutionSubstate::Idle);
                        break Err(AcpError::ConnectionClosed);
                    }
                }
            }

            _ = shutdown.cancelled() => {
                latch.fire(&sink, "context_canceled", serde_json::json!({}));
                set_substate(ExecutionSubstate::Idle);
                break Err(AcpError::Cancelled);
            }
        }
    };

    writer.close();
    result
}

#[allow(clippy::too_many_arguments)]
fn spawn_permission_pump(
    state: Arc<dyn AcpStateStore>,
    sink: Arc<EventSink>,
    clock: Arc<dyn crew_core::Clock>,
    namespace: String,
    task_id: u64,
    session_id: String,
    mut permissions_rx: mpsc::UnboundedReceiver<InboundPermission>,
    mut permission_cmd_rx: mpsc::Receiver<String>,
    stop: CancellationToken,
    shutdown: CancellationToken,
    run_token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let inbound = tokio::select! {
                inbound = permissions_rx.recv() => inbound,
                _ = run_token.cancelled() => return,
            };
            let Some(inbound) = inbound else { return };

            let now = crew_core::clock::format_rfc3339(clock.now());
            if let Err(e) = state.save(
                &namespace,
                task_id,
                &AcpExecutionState::new(ExecutionSubstate::AwaitingPermission, &session_id, &now),
            ) {
                warn!(event = "acp.runtime.substate_save_failed", error = %e);
            }
            sink.emit(
                "request_permission",
                serde_json::to_value(&inbound.params).unwrap_or_default(),
            );

            let valid: BTreeSet<String> = inbound
                .params
                .options
                .iter()
                .map(|option| option.option_id.clone())
                .collect();

            let outcome = loop {
                tokio::select! {
                    cmd = permission_cmd_rx.recv() => match cmd {
                        None => break PermissionOutcome::Cancelled,
                        Some(option_id) if valid.contains(&option_id) => {
                            break PermissionOutcome::Selected { option_id };
                        }
                        Some(unknown) => {
                            warn!(
                                event = "acp.runtime.unknown_permission_option",
                                option_id = %unknown,
                                "Ignoring permission reply with unknown option id"
                            );
                        }
                    },
                    _ = stop.cancelled() => break PermissionOutcome::Cancelled,
                    _ = shutdown.cancelled() => break PermissionOutcome::Cancelled,
                    _ = run_token.cancelled() => break PermissionOutcome::Cancelled,
                }
            };

            if matches!(outcome, PermissionOutcome::Selected { .. }) {
                let now = crew_core::clock::format_rfc3339(clock.now());
                if let Err(e) = state.save(
                    &namespace,
                    task_id,
                    &AcpExecutionState::new(ExecutionSubstate::Running, &session_id, &now),
                ) {
                    warn!(event = "acp.runtime.substate_save_failed", error = %e);
                }
            }
            let _ = inbound.respond.send(RequestPermissionResult { outcome });
        }
    });
}

fn spawn_update_forwarder(
    sink: Arc<EventSink>,
    mut updates_rx: mpsc::UnboundedReceiver<SessionUpdateParams>,
    forward_output: bool,
    run_token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let update = tokio::select! {
                update = updates_rx.recv() => update,
                _ = run_token.cancelled() => return,
            };
            let Some(update) = update else { return };

            if forward_output
                && let Some(text) = update.update.display_text()
            {
                print!("{text}");
            }
            sink.emit(
                update.update.event_type(),
                serde_json::to_value(&update.update).unwrap_or_default(),
            );
        }
    });
}
