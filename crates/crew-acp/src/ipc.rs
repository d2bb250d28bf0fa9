//! Per-task IPC: how `acp send` style callers reach a running ACP loop.
//!
//! The production transport is a Unix domain socket per task carrying
//! JSONL-encoded commands; an in-memory channel implementation backs tests
//! and embedders.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crew_paths::{CrewPaths, slugify_namespace};

use crate::commands::AcpCommand;
use crate::errors::AcpError;

/// One task's command channel.
#[async_trait]
pub trait AcpIpc: Send + Sync {
    /// Next inbound command; `IpcClosed` when the channel is gone.
    async fn next(&self) -> Result<AcpCommand, AcpError>;
    /// Deliver a command to the consuming side.
    async fn send(&self, cmd: AcpCommand) -> Result<(), AcpError>;
}

/// Hands out the channel endpoint for a `(namespace, task id)` pair.
///
/// The runtime must use the instance returned for the current run and not
/// retain endpoints from previous runs across reruns.
pub trait AcpIpcFactory: Send + Sync {
    fn for_task(&self, namespace: &str, id: u64) -> Result<Arc<dyn AcpIpc>, AcpError>;
}

// --- Unix socket transport ---

/// Socket-backed endpoint. The first `next()` call binds the listener; a
/// `send()` connects as a client and writes one JSONL command.
pub struct UnixAcpIpc {
    socket_path: PathBuf,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<AcpCommand>>>,
    accept_started: Mutex<bool>,
    tx: mpsc::UnboundedSender<AcpCommand>,
}

impl UnixAcpIpc {
    pub fn new(socket_path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            socket_path,
            inbox: Mutex::new(Some(rx)),
            accept_started: Mutex::new(false),
            tx,
        }
    }

    fn ensure_listener(&self) -> Result<(), AcpError> {
        let mut started = self.accept_started.lock().unwrap();
        if *started {
            return Ok(());
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A previous run's socket file blocks bind; it is dead by
        // definition since the runtime owns the path for one run.
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        let tx = self.tx.clone();
        let path = self.socket_path.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let tx = tx.clone();
                        tokio::spawn(read_commands(stream, tx));
                    }
                    Err(e) => {
                        warn!(
                            event = "acp.ipc.accept_failed",
                            socket = %path.display(),
                            error = %e,
                        );
                        break;
                    }
                }
            }
        });

        *started = true;
        Ok(())
    }
}

async fn read_commands(stream: UnixStream, tx: mpsc::UnboundedSender<AcpCommand>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<AcpCommand>(trimmed) {
                    Ok(cmd) => {
                        debug!(event = "acp.ipc.command_received", kind = cmd.kind());
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            event = "acp.ipc.invalid_command",
                            error = %e,
                            line = %trimmed,
                        );
                    }
                }
            }
            Err(e) => {
                warn!(event = "acp.ipc.read_failed", error = %e);
                break;
            }
        }
    }
}

#[async_trait]
impl AcpIpc for UnixAcpIpc {
    async fn next(&self) -> Result<AcpCommand, AcpError> {
        self.ensure_listener()?;
        // The receiver is taken out of the mutex for the await; a single
        // consumer is the contract.
        let mut rx = self
            .inbox
            .lock()
            .unwrap()
            .take()
            .ok_or(AcpError::IpcClosed)?;
        let result = rx.recv().await;
        *self.inbox.lock().unwrap() = Some(rx);
        result.ok_or(AcpError::IpcClosed)
    }

    async fn send(&self, cmd: AcpCommand) -> Result<(), AcpError> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        let mut line = serde_json::to_vec(&cmd)?;
        line.push(b'\n');
        stream.write_all(&line).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl Drop for UnixAcpIpc {
    fn drop(&mut self) {
        if *self.accept_started.lock().unwrap() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// Factory creating one Unix socket endpoint per task under the crew
/// directory.
pub struct UnixAcpIpcFactory {
    paths: CrewPaths,
    endpoints: Mutex<HashMap<(String, u64), Arc<UnixAcpIpc>>>,
}

impl UnixAcpIpcFactory {
    pub fn new(paths: CrewPaths) -> Self {
        Self {
            paths,
            endpoints: Mutex::new(HashMap::new()),
        }
    }
}

impl AcpIpcFactory for UnixAcpIpcFactory {
    fn for_task(&self, namespace: &str, id: u64) -> Result<Arc<dyn AcpIpc>, AcpError> {
        let key = (slugify_namespace(namespace), id);
        let mut endpoints = self.endpoints.lock().unwrap();
        let endpoint = endpoints
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(UnixAcpIpc::new(self.paths.acp_socket(&key.0, id)))
            })
            .clone();
        Ok(endpoint)
    }
}

// --- In-memory transport (tests, embedders) ---

pub struct InMemoryAcpIpc {
    tx: Mutex<Option<mpsc::UnboundedSender<AcpCommand>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<AcpCommand>>>,
}

impl Default for InMemoryAcpIpc {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl InMemoryAcpIpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the sending half; pending `next()` calls resolve to
    /// `IpcClosed` once the buffer drains.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }
}

#[async_trait]
impl AcpIpc for InMemoryAcpIpc {
    async fn next(&self) -> Result<AcpCommand, AcpError> {
        let mut rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or(AcpError::IpcClosed)?;
        let result = rx.recv().await;
        *self.rx.lock().unwrap() = Some(rx);
        result.ok_or(AcpError::IpcClosed)
    }

    async fn send(&self, cmd: AcpCommand) -> Result<(), AcpError> {
        let guard = self.tx.lock().unwrap();
        let tx = guard.as_ref().ok_or(AcpError::IpcClosed)?;
        tx.send(cmd).map_err(|_| AcpError::IpcClosed)
    }
}

/// In-memory factory recording which `(namespace, id)` pairs were asked
/// for; tests assert against `requests`.
#[derive(Default)]
pub struct InMemoryAcpIpcFactory {
    pub requests: Mutex<Vec<(String, u64)>>,
    endpoints: Mutex<HashMap<(String, u64), Arc<InMemoryAcpIpc>>>,
}

impl InMemoryAcpIpcFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, namespace: &str, id: u64) -> Arc<InMemoryAcpIpc> {
        let key = (slugify_namespace(namespace), id);
        self.endpoints
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(InMemoryAcpIpc::new()))
            .clone()
    }
}

impl AcpIpcFactory for InMemoryAcpIpcFactory {
    fn for_task(&self, namespace: &str, id: u64) -> Result<Arc<dyn AcpIpc>, AcpError> {
        let key = (slugify_namespace(namespace), id);
        self.requests.lock().unwrap().push(key.clone());
        Ok(self.endpoint(namespace, id))
    }
}
