//! Command router: reads commands from the per-task IPC and demultiplexes
//! them onto per-kind channels for the main loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::commands::AcpCommand;
use crate::errors::AcpError;
use crate::ipc::AcpIpc;

const CHANNEL_CAPACITY: usize = 10;

/// The router's output side.
pub struct RouterChannels {
    pub prompt_rx: mpsc::Receiver<String>,
    pub permission_rx: mpsc::Receiver<String>,
    pub cancel_rx: mpsc::Receiver<()>,
    /// Cancelled exactly once when a `stop` command arrives.
    pub stop: CancellationToken,
    /// Non-cancellation IPC errors surface here.
    pub error_rx: mpsc::Receiver<AcpError>,
}

/// Spawn the router task. It runs until a `stop` command, an IPC error, or
/// shutdown of the passed token.
pub fn spawn_router(ipc: Arc<dyn AcpIpc>, shutdown: CancellationToken) -> RouterChannels {
    let (prompt_tx, prompt_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (permission_tx, permission_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (cancel_tx, cancel_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (error_tx, error_rx) = mpsc::channel(1);
    let stop = CancellationToken::new();
    let stop_out = stop.clone();

    tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                command = ipc.next() => command,
                _ = shutdown.cancelled() => {
                    debug!(event = "acp.router.shutdown");
                    return;
                }
            };

            match command {
                Ok(AcpCommand::Prompt { text }) => {
                    if prompt_tx.send(text).await.is_err() {
                        return;
                    }
                }
                Ok(AcpCommand::Permission { option_id }) => {
                    if permission_tx.send(option_id).await.is_err() {
                        return;
                    }
                }
                Ok(AcpCommand::Cancel) => {
                    if cancel_tx.send(()).await.is_err() {
                        return;
                    }
                }
                Ok(AcpCommand::Stop) => {
                    // Idempotent across repeated stop commands: cancelling
                    // an already-cancelled token is a no-op.
                    stop.cancel();
                    debug!(event = "acp.router.stop_received");
                    return;
                }
                Err(e) => {
                    warn!(event = "acp.router.ipc_error", error = %e);
                    let _ = error_tx.send(e).await;
                    return;
                }
            }
        }
    });

    RouterChannels {
        prompt_rx,
        permission_rx,
        cancel_rx,
        stop: stop_out,
        error_rx,
    }
}
