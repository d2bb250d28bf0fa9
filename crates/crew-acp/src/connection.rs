//! The client side of one agent's ACP connection.
//!
//! Owns the child's stdio: outbound requests carry monotonically
//! increasing ids matched against a pending-response map; inbound traffic
//! is demultiplexed into session updates, permission requests, and
//! responses. Filesystem and terminal methods are answered with
//! `MethodNotFound`: the runtime offers neither capability.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::AcpError;
use crate::jsonrpc::{self, Message, RequestId, RpcError};
use crate::protocol::{
    CancelParams, ClientCapabilities, ContentBlock, InitializeParams, InitializeResult,
    METHOD_INITIALIZE, METHOD_REQUEST_PERMISSION, METHOD_SESSION_CANCEL, METHOD_SESSION_NEW,
    METHOD_SESSION_PROMPT, METHOD_SESSION_UPDATE, NewSessionParams, NewSessionResult,
    PROTOCOL_VERSION, PromptParams, PromptResult, RequestPermissionParams,
    RequestPermissionResult, SessionUpdateParams, UNSUPPORTED_CLIENT_METHODS,
};

/// A permission request waiting for the runtime's decision.
pub struct InboundPermission {
    pub params: RequestPermissionParams,
    pub respond: oneshot::Sender<RequestPermissionResult>,
}

/// Inbound traffic the runtime consumes.
pub struct ConnectionEvents {
    pub updates_rx: mpsc::UnboundedReceiver<SessionUpdateParams>,
    pub permissions_rx: mpsc::UnboundedReceiver<InboundPermission>,
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>;

pub struct AgentConnection {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    closed: CancellationToken,
}

impl AgentConnection {
    /// Wire a connection over the agent's stdio and spawn the read pump.
    pub fn new<R, W>(reader: R, writer: W) -> (Arc<Self>, ConnectionEvents)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (permissions_tx, permissions_rx) = mpsc::unbounded_channel();

        let conn = Arc::new(Self {
            writer: tokio::sync::Mutex::new(Box::new(writer) as Box<dyn AsyncWrite + Send + Unpin>),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closed: CancellationToken::new(),
        });

        let pump_conn = conn.clone();
        tokio::spawn(async move {
            pump_conn.read_pump(reader, updates_tx, permissions_tx).await;
        });

        (conn, ConnectionEvents {
            updates_rx,
            permissions_rx,
        })
    }

    /// Resolves when the agent's stdout reaches EOF or fails.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn read_pump<R>(
        self: Arc<Self>,
        reader: R,
        updates_tx: mpsc::UnboundedSender<SessionUpdateParams>,
        permissions_tx: mpsc::UnboundedSender<InboundPermission>,
    ) where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut reader = BufReader::new(reader);
        loop {
            let message = match jsonrpc::read_message(&mut reader).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!(event = "acp.connection.eof");
                    break;
                }
                Err(e) => {
                    warn!(event = "acp.connection.read_failed", error = %e);
                    break;
                }
            };

            if message.is_response() {
                self.dispatch_response(message);
            } else if message.is_request() {
                self.clone().dispatch_request(message, &permissions_tx);
            } else if message.is_notification() {
                self.dispatch_notification(message, &updates_tx);
            }
        }

        self.closed.cancel();
        // Fail anything still waiting for a response.
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(RpcError {
                code: 0,
                message: "connection closed".to_string(),
                data: None,
            }));
        }
    }

    fn dispatch_response(&self, message: Message) {
        let Some(RequestId::Number(id)) = message.id else {
            warn!(event = "acp.connection.unmatched_response", id = ?message.id);
            return;
        };
        let Some(tx) = self.pending.lock().unwrap().remove(&id) else {
            warn!(event = "acp.connection.unknown_response_id", id = id);
            return;
        };
        let result = match message.error {
            Some(error) => Err(error),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
    }

    fn dispatch_request(
        self: Arc<Self>,
        message: Message,
        permissions_tx: &mpsc::UnboundedSender<InboundPermission>,
    ) {
        let method = message.method.clone().unwrap_or_default();
        let Some(id) = message.id.clone() else {
            return;
        };

        if method == METHOD_REQUEST_PERMISSION {
            let params = match serde_json::from_value::<RequestPermissionParams>(
                message.params.unwrap_or(Value::Null),
            ) {
                Ok(params) => params,
                Err(e) => {
                    warn!(event = "acp.connection.bad_permission_request", error = %e);
                    let conn = self.clone();
                    tokio::spawn(async move {
                        let _ = conn
                            .write(Message::error_response(
                                id,
                                RpcError {
                                    code: -32602,
                                    message: format!("invalid params: {e}"),
                                    data: None,
                                },
                            ))
                            .await;
                    });
                    return;
                }
            };

            let (respond_tx, respond_rx) = oneshot::channel();
            if permissions_tx
                .send(InboundPermission {
                    params,
                    respond: respond_tx,
                })
                .is_err()
            {
                return;
            }

            let conn = self;
            tokio::spawn(async move {
                // A dropped responder means the run is over; cancelled is
                // the honest answer.
                let result = respond_rx.await.unwrap_or(RequestPermissionResult {
                    outcome: crate::protocol::PermissionOutcome::Cancelled,
                });
                let payload = serde_json::to_value(&result).unwrap_or(Value::Null);
                let _ = conn.write(Message::response(id, payload)).await;
            });
            return;
        }

        // fs/* and terminal/* (and anything else unexpected) get
        // MethodNotFound.
        if !UNSUPPORTED_CLIENT_METHODS.contains(&method.as_str()) {
            debug!(event = "acp.connection.unknown_method", method = %method);
        }
        let conn = self;
        tokio::spawn(async move {
            let _ = conn
                .write(Message::error_response(
                    id,
                    RpcError::method_not_found(&method),
                ))
                .await;
        });
    }

    fn dispatch_notification(
        &self,
        message: Message,
        updates_tx: &mpsc::UnboundedSender<SessionUpdateParams>,
    ) {
        let method = message.method.as_deref().unwrap_or_default();
        if method != METHOD_SESSION_UPDATE {
            debug!(event = "acp.connection.unknown_notification", method = %method);
            return;
        }
        match serde_json::from_value::<SessionUpdateParams>(message.params.unwrap_or(Value::Null))
        {
            Ok(update) => {
                let _ = updates_tx.send(update);
            }
            Err(e) => {
                warn!(event = "acp.connection.bad_session_update", error = %e);
            }
        }
    }

    async fn write(&self, message: Message) -> Result<(), AcpError> {
        let mut writer = self.writer.lock().await;
        jsonrpc::write_message(&mut *writer, &message).await
    }

    /// Send a request and await its response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, AcpError> {
        if self.closed.is_cancelled() {
            return Err(AcpError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        if let Err(e) = self.write(Message::request(id, method, params)).await {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) if error.code == 0 && error.message == "connection closed" => {
                Err(AcpError::ConnectionClosed)
            }
            Ok(Err(error)) => Err(AcpError::Rpc {
                code: error.code,
                message: error.message,
            }),
            Err(_) => Err(AcpError::ConnectionClosed),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), AcpError> {
        self.write(Message::notification(method, params)).await
    }

    // --- Typed ACP methods ---

    pub async fn initialize(&self) -> Result<InitializeResult, AcpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION,
            client_capabilities: ClientCapabilities::none(),
        };
        let result = self
            .request(METHOD_INITIALIZE, serde_json::to_value(params)?)
            .await?;
        jsonrpc::parse_result(Some(result))
    }

    pub async fn new_session(&self, cwd: &str) -> Result<NewSessionResult, AcpError> {
        let params = NewSessionParams {
            cwd: cwd.to_string(),
        };
        let result = self
            .request(METHOD_SESSION_NEW, serde_json::to_value(params)?)
            .await?;
        jsonrpc::parse_result(Some(result))
    }

    pub async fn prompt(&self, session_id: &str, text: &str) -> Result<PromptResult, AcpError> {
        let params = PromptParams {
            session_id: session_id.to_string(),
            prompt: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        };
        let result = self
            .request(METHOD_SESSION_PROMPT, serde_json::to_value(params)?)
            .await?;
        jsonrpc::parse_result(Some(result))
    }

    pub async fn cancel(&self, session_id: &str) -> Result<(), AcpError> {
        let params = CancelParams {
            session_id: session_id.to_string(),
        };
        self.notify(METHOD_SESSION_CANCEL, serde_json::to_value(params)?)
            .await
    }
}
