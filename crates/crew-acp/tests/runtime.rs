//! End-to-end ACP runtime tests against a scripted shell agent speaking
//! line-framed JSON-RPC over stdio.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crew_acp::commands::AcpCommand;
use crew_acp::control::{ControlInput, send_command};
use crew_acp::errors::AcpError;
use crew_acp::events::FsAcpEventWriterFactory;
use crew_acp::ipc::{AcpIpc, AcpIpcFactory, InMemoryAcpIpcFactory};
use crew_acp::runtime::{AcpDeps, ExecuteInput, execute};
use crew_acp::state::{AcpExecutionState, AcpStateStore, FsAcpStateStore};
use crew_core::lifecycle::new_task::{NewTaskInput, new_task};
use crew_core::lifecycle::test_support::{TestHarness, harness_with_config, test_config};
use crew_core::tasks::{ExecutionSubstate, TaskStatus, TaskStore};

/// Write a fake agent script and return a command line running it.
fn fake_agent(dir: &std::path::Path, body: &str) -> String {
    let script = format!("#!/usr/bin/env bash\n{body}\n");
    let path = dir.join("fake-agent.sh");
    std::fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    format!("bash {}", path.display())
}

/// A fake agent that completes the handshake, answers one prompt with a
/// message chunk and `end_turn`, and exits cleanly on cancel.
const HAPPY_AGENT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocol_version":1}}' ;;
    *'"session/new"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"session_id":"sess-test"}}' ;;
    *'"session/prompt"'*)
      printf '%s\n' '{"jsonrpc":"2.0","method":"session/update","params":{"session_id":"sess-test","update":{"session_update":"agent_message_chunk","content":{"type":"text","text":"hi there"}}}}'
      printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"stop_reason":"end_turn"}}' ;;
    *'"session/cancel"'*)
      exit 0 ;;
  esac
done
"#;

struct AcpHarness {
    _tmp: tempfile::TempDir,
    _agent_tmp: tempfile::TempDir,
    deps: Arc<AcpDeps>,
    state: Arc<FsAcpStateStore>,
    ipc: Arc<InMemoryAcpIpcFactory>,
    events_path: std::path::PathBuf,
}

fn acp_harness(agent_body: &str) -> AcpHarness {
    let agent_tmp = tempfile::TempDir::new().unwrap();
    let command = fake_agent(agent_tmp.path(), agent_body);

    let mut config = test_config();
    config.agents.get_mut("claude").unwrap().command = command;
    config.agents.get_mut("claude").unwrap().prompt = None;

    let TestHarness {
        tmp,
        deps,
        store: _,
        git: _,
        worktrees: _,
        sessions: _,
        executor: _,
        runner: _,
        clock: _,
    } = harness_with_config(config);

    let paths = deps.paths.clone();
    let state = Arc::new(FsAcpStateStore::new(paths.clone()));
    let ipc = Arc::new(InMemoryAcpIpcFactory::new());
    let events_path = paths.acp_events_file("default", 1);

    let deps = Arc::new(AcpDeps {
        core: deps,
        state: state.clone(),
        events: Arc::new(FsAcpEventWriterFactory::new(paths)),
        ipc: ipc.clone(),
    });

    AcpHarness {
        _tmp: tmp,
        _agent_tmp: agent_tmp,
        deps,
        state,
        ipc,
        events_path,
    }
}

fn seed_task(deps: &AcpDeps) -> u64 {
    new_task(
        &deps.core,
        &NewTaskInput {
            title: "ACP task".to_string(),
            description: "Drive me over ACP".to_string(),
            ..NewTaskInput::default()
        },
    )
    .unwrap()
    .task
    .id
}

async fn wait_for_substate(
    state: &FsAcpStateStore,
    namespace: &str,
    id: u64,
    expected: ExecutionSubstate,
) {
    for _ in 0..100 {
        if let Ok(current) = state.load(namespace, id)
            && current.execution_substate == expected
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("substate never reached {expected}");
}

fn read_events(path: &std::path::Path) -> Vec<serde_json::Value> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_prompt_turn_and_stop() {
    let h = acp_harness(HAPPY_AGENT);
    let id = seed_task(&h.deps);

    let deps = h.deps.clone();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(async move {
        execute(
            &deps,
            shutdown,
            &ExecuteInput {
                task_id: id,
                namespace: String::new(),
                ..ExecuteInput::default()
            },
        )
        .await
    });

    // Handshake done: substate running, task bound
    wait_for_substate(&h.state, "", id, ExecutionSubstate::Running).await;
    let task = h.deps.core.store.get("", id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.agent, "claude");
    assert_eq!(task.session, "crew-1-acp");
    assert_eq!(task.execution_substate, ExecutionSubstate::Running);

    let state = h.state.load("", id).unwrap();
    assert_eq!(state.session_id, "sess-test");

    // Prompt turn: end_turn flips the substate to awaiting_user
    let endpoint = h.ipc.endpoint("", id);
    endpoint
        .send(AcpCommand::Prompt {
            text: "hello".to_string(),
        })
        .await
        .unwrap();
    wait_for_substate(&h.state, "", id, ExecutionSubstate::AwaitingUser).await;
    // The session id survives the awaiting_user transition
    assert_eq!(h.state.load("", id).unwrap().session_id, "sess-test");

    // Stop ends the run cleanly
    endpoint.send(AcpCommand::Stop).await.unwrap();
    let output = run.await.unwrap().unwrap();
    assert_eq!(output.end_reason, "stop");
    assert_eq!(output.session_id, "sess-test");

    wait_for_substate(&h.state, "", id, ExecutionSubstate::Idle).await;

    // Event log: prompt_sent, the streamed chunk, exactly one session_end
    let events = read_events(&h.events_path);
    let types: Vec<&str> = events
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"prompt_sent"));
    assert!(types.contains(&"agent_message_chunk"));
    assert_eq!(
        types.iter().filter(|t| **t == "session_end").count(),
        1,
        "session_end must fire exactly once: {types:?}"
    );
    let end = events
        .iter()
        .find(|e| e["type"] == "session_end")
        .unwrap();
    assert_eq!(end["payload"]["reason"], "stop");
    assert_eq!(end["session_id"], "sess-test");

    // Every event is stamped with the session id and a timestamp
    for event in &events {
        assert_eq!(event["session_id"], "sess-test");
        assert!(event["ts"].as_str().unwrap().ends_with('Z'));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_permission_pump() {
    const PERMISSION_AGENT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocol_version":1}}' ;;
    *'"session/new"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"session_id":"sess-perm"}}' ;;
    *'"session/prompt"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":900,"method":"session/request_permission","params":{"session_id":"sess-perm","options":[{"option_id":"allow"},{"option_id":"deny"}]}}' ;;
    *'"outcome"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"stop_reason":"end_turn"}}' ;;
    *'"session/cancel"'*)
      exit 0 ;;
  esac
done
"#;

    let h = acp_harness(PERMISSION_AGENT);
    let id = seed_task(&h.deps);

    let deps = h.deps.clone();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(async move {
        execute(
            &deps,
            shutdown,
            &ExecuteInput {
                task_id: id,
                namespace: String::new(),
                ..ExecuteInput::default()
            },
        )
        .await
    });

    wait_for_substate(&h.state, "", id, ExecutionSubstate::Running).await;

    let endpoint = h.ipc.endpoint("", id);
    endpoint
        .send(AcpCommand::Prompt {
            text: "do something privileged".to_string(),
        })
        .await
        .unwrap();

    // The agent asks for permission; the pump parks in awaiting_permission
    wait_for_substate(&h.state, "", id, ExecutionSubstate::AwaitingPermission).await;

    // An unknown option id is warned about and ignored
    endpoint
        .send(AcpCommand::Permission {
            option_id: "definitely-not-an-option".to_string(),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        h.state.load("", id).unwrap().execution_substate,
        ExecutionSubstate::AwaitingPermission
    );

    // The matching option resolves the request and the turn completes
    endpoint
        .send(AcpCommand::Permission {
            option_id: "allow".to_string(),
        })
        .await
        .unwrap();
    wait_for_substate(&h.state, "", id, ExecutionSubstate::AwaitingUser).await;

    endpoint.send(AcpCommand::Stop).await.unwrap();
    run.await.unwrap().unwrap();

    let events = read_events(&h.events_path);
    let permission_event = events
        .iter()
        .find(|e| e["type"] == "request_permission")
        .expect("request_permission event recorded");
    assert_eq!(
        permission_event["payload"]["options"][0]["option_id"],
        "allow"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_process_error() {
    const CRASHING_AGENT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocol_version":1}}' ;;
    *'"session/new"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"session_id":"sess-crash"}}' ;;
    *'"session/prompt"'*)
      exit 7 ;;
  esac
done
"#;

    let h = acp_harness(CRASHING_AGENT);
    let id = seed_task(&h.deps);

    let deps = h.deps.clone();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(async move {
        execute(
            &deps,
            shutdown,
            &ExecuteInput {
                task_id: id,
                namespace: String::new(),
                ..ExecuteInput::default()
            },
        )
        .await
    });

    wait_for_substate(&h.state, "", id, ExecutionSubstate::Running).await;
    h.ipc
        .endpoint("", id)
        .send(AcpCommand::Prompt {
            text: "trigger the crash".to_string(),
        })
        .await
        .unwrap();

    let result = run.await.unwrap();
    assert!(matches!(
        result,
        Err(AcpError::ProcessExited { code: Some(7) })
    ));

    // Task marked error, substate idle
    let task = h.deps.core.store.get("", id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.agent.is_empty());
    assert_eq!(
        h.state.load("", id).unwrap().execution_substate,
        ExecutionSubstate::Idle
    );

    let events = read_events(&h.events_path);
    let ends: Vec<_> = events
        .iter()
        .filter(|e| e["type"] == "session_end")
        .collect();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0]["payload"]["reason"], "process_error");
    assert_eq!(ends[0]["payload"]["code"], 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_caller_cancellation() {
    let h = acp_harness(HAPPY_AGENT);
    let id = seed_task(&h.deps);

    let deps = h.deps.clone();
    let shutdown = CancellationToken::new();
    let shutdown_handle = shutdown.clone();
    let run = tokio::spawn(async move {
        execute(
            &deps,
            shutdown_handle,
            &ExecuteInput {
                task_id: id,
                namespace: String::new(),
                ..ExecuteInput::default()
            },
        )
        .await
    });

    wait_for_substate(&h.state, "", id, ExecutionSubstate::Running).await;
    shutdown.cancel();

    let result = run.await.unwrap();
    assert!(matches!(result, Err(AcpError::Cancelled)));

    let events = read_events(&h.events_path);
    let end = events
        .iter()
        .find(|e| e["type"] == "session_end")
        .unwrap();
    assert_eq!(end["payload"]["reason"], "context_canceled");
    assert_eq!(
        h.state.load("", id).unwrap().execution_substate,
        ExecutionSubstate::Idle
    );
}

// --- Control-side tests (no runtime involved) ---

#[derive(Default)]
struct RecordingStateStore {
    saves: Mutex<Vec<(String, u64, AcpExecutionState)>>,
}

impl AcpStateStore for RecordingStateStore {
    fn load(&self, namespace: &str, id: u64) -> Result<AcpExecutionState, AcpError> {
        Err(AcpError::StateNotFound {
            namespace: namespace.to_string(),
            id,
        })
    }

    fn save(&self, namespace: &str, id: u64, state: &AcpExecutionState) -> Result<(), AcpError> {
        self.saves
            .lock()
            .unwrap()
            .push((namespace.to_string(), id, state.clone()));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_control_prompt_reaches_ipc_and_records_running() {
    let TestHarness { tmp, deps, .. } = harness_with_config(test_config());
    let paths = deps.paths.clone();

    // Task 1 lives in a spaced namespace; the factory must see the slug
    new_task(
        &deps,
        &NewTaskInput {
            title: "Alpha work".to_string(),
            namespace: "Team Alpha".to_string(),
            ..NewTaskInput::default()
        },
    )
    .unwrap();

    let state = Arc::new(RecordingStateStore::default());
    let ipc = Arc::new(InMemoryAcpIpcFactory::new());
    let acp_deps = AcpDeps {
        core: deps,
        state: state.clone(),
        events: Arc::new(FsAcpEventWriterFactory::new(paths)),
        ipc: ipc.clone(),
    };

    send_command(
        &acp_deps,
        &ControlInput {
            task_id: 1,
            namespace: "Team Alpha".to_string(),
            command: AcpCommand::Prompt {
                text: "hello".to_string(),
            },
        },
    )
    .await
    .unwrap();

    // Factory invoked with the slugged namespace and the task id
    assert_eq!(
        ipc.requests.lock().unwrap().as_slice(),
        [("team-alpha".to_string(), 1)]
    );

    // The IPC received the prompt command
    let endpoint = ipc.endpoint("Team Alpha", 1);
    assert_eq!(
        endpoint.next().await.unwrap(),
        AcpCommand::Prompt {
            text: "hello".to_string()
        }
    );

    // The state store received a running save
    let saves = state.saves.lock().unwrap();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].1, 1);
    assert_eq!(saves[0].2.execution_substate, ExecutionSubstate::Running);

    drop(tmp);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_control_non_prompt_commands_skip_state_save() {
    let TestHarness { tmp, deps, .. } = harness_with_config(test_config());
    let paths = deps.paths.clone();
    new_task(
        &deps,
        &NewTaskInput {
            title: "T".to_string(),
            ..NewTaskInput::default()
        },
    )
    .unwrap();

    let state = Arc::new(RecordingStateStore::default());
    let ipc = Arc::new(InMemoryAcpIpcFactory::new());
    let acp_deps = AcpDeps {
        core: deps,
        state: state.clone(),
        events: Arc::new(FsAcpEventWriterFactory::new(paths)),
        ipc: ipc.clone(),
    };

    for command in [AcpCommand::Cancel, AcpCommand::Stop] {
        send_command(
            &acp_deps,
            &ControlInput {
                task_id: 1,
                namespace: String::new(),
                command,
            },
        )
        .await
        .unwrap();
    }

    assert!(state.saves.lock().unwrap().is_empty());
    drop(tmp);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_control_missing_task_errors() {
    let TestHarness { tmp, deps, .. } = harness_with_config(test_config());
    let paths = deps.paths.clone();
    let acp_deps = AcpDeps {
        core: deps,
        state: Arc::new(RecordingStateStore::default()),
        events: Arc::new(FsAcpEventWriterFactory::new(paths)),
        ipc: Arc::new(InMemoryAcpIpcFactory::new()),
    };

    let result = send_command(
        &acp_deps,
        &ControlInput {
            task_id: 42,
            namespace: String::new(),
            command: AcpCommand::Stop,
        },
    )
    .await;
    assert!(matches!(
        result,
        Err(AcpError::Lifecycle(
            crew_core::LifecycleError::TaskNotFound { id: 42 }
        ))
    ));
    drop(tmp);
}
