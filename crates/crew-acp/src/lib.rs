//! crew-acp: drive an agent over the Agent Control Protocol as a
//! long-lived JSON-RPC subprocess.
//!
//! The runtime spawns the agent with piped stdio, performs the
//! `initialize` / `session/new` handshake, and then multiplexes prompts,
//! permission decisions, and cancellation from a per-task IPC channel
//! while forwarding agent session updates to a structured event log.

pub mod commands;
pub mod connection;
pub mod control;
pub mod errors;
pub mod events;
pub mod ipc;
pub mod jsonrpc;
pub mod protocol;
pub mod router;
pub mod runtime;
pub mod state;

pub use commands::AcpCommand;
pub use connection::AgentConnection;
pub use control::{ControlInput, send_command};
pub use errors::AcpError;
pub use events::{
    AcpEvent, AcpEventWriter, AcpEventWriterFactory, FsAcpEventWriter, FsAcpEventWriterFactory,
};
pub use ipc::{
    AcpIpc, AcpIpcFactory, InMemoryAcpIpc, InMemoryAcpIpcFactory, UnixAcpIpc, UnixAcpIpcFactory,
};
pub use protocol::{PROTOCOL_VERSION, SessionUpdate, StopReason};
pub use runtime::{AcpDeps, ExecuteInput, ExecuteOutput, execute};
pub use state::{AcpExecutionState, AcpStateStore, FsAcpStateStore};
