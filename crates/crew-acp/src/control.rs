//! Client side of the per-task IPC: forward a control command to a running
//! ACP loop.

use tracing::info;

use crew_core::tasks::ExecutionSubstate;

use crate::commands::AcpCommand;
use crate::errors::AcpError;
use crate::ipc::AcpIpc;
use crate::runtime::AcpDeps;
use crate::state::AcpExecutionState;

#[derive(Debug, Clone)]
pub struct ControlInput {
    pub task_id: u64,
    pub namespace: String,
    pub command: AcpCommand,
}

/// Send a command to the task's ACP loop.
///
/// For `prompt`, the sender optimistically records the `running` substate
/// so observers see the turn begin even before the loop persists its own
/// view; the session id of any previous record is preserved.
pub async fn send_command(deps: &AcpDeps, input: &ControlInput) -> Result<(), AcpError> {
    let task = deps
        .core
        .store
        .get(&input.namespace, input.task_id)?
        .ok_or(crew_core::LifecycleError::TaskNotFound { id: input.task_id })?;

    let ipc = deps.ipc.for_task(&input.namespace, input.task_id)?;
    ipc.send(input.command.clone()).await?;

    if matches!(input.command, AcpCommand::Prompt { .. }) {
        let session_id = match deps.state.load(&input.namespace, input.task_id) {
            Ok(state) => state.session_id,
            Err(AcpError::StateNotFound { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        deps.state.save(
            &input.namespace,
            input.task_id,
            &AcpExecutionState::new(ExecutionSubstate::Running, &session_id, &deps.core.now()),
        )?;
    }

    info!(
        event = "acp.control.command_sent",
        task_id = task.id,
        kind = input.command.kind(),
    );
    Ok(())
}
