//! ACP execution-substate store.
//!
//! One record per `(namespace, task id)`: the execution substate and the
//! agent session id, written atomically so the two fields can never be
//! observed inconsistently.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crew_core::ExecutionSubstate;
use crew_paths::CrewPaths;

use crate::errors::AcpError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AcpExecutionState {
    pub execution_substate: ExecutionSubstate,
    pub session_id: String,
    /// RFC 3339 UTC.
    pub updated_at: String,
}

impl AcpExecutionState {
    pub fn new(substate: ExecutionSubstate, session_id: &str, updated_at: &str) -> Self {
        Self {
            execution_substate: substate,
            session_id: session_id.to_string(),
            updated_at: updated_at.to_string(),
        }
    }
}

/// Durable view of a task's ACP execution substate.
pub trait AcpStateStore: Send + Sync {
    /// `StateNotFound` for missing keys; callers treat that as `idle`.
    fn load(&self, namespace: &str, id: u64) -> Result<AcpExecutionState, AcpError>;
    fn save(&self, namespace: &str, id: u64, state: &AcpExecutionState) -> Result<(), AcpError>;
}

/// Filesystem-backed state store under `<crew_dir>/acp/<ns>/`.
pub struct FsAcpStateStore {
    paths: CrewPaths,
}

impl FsAcpStateStore {
    pub fn new(paths: CrewPaths) -> Self {
        Self { paths }
    }

    fn state_file(&self, namespace: &str, id: u64) -> PathBuf {
        self.paths.acp_state_file(namespace, id)
    }
}

impl AcpStateStore for FsAcpStateStore {
    fn load(&self, namespace: &str, id: u64) -> Result<AcpExecutionState, AcpError> {
        let path = self.state_file(namespace, id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AcpError::StateNotFound {
                    namespace: namespace.to_string(),
                    id,
                });
            }
            Err(e) => return Err(AcpError::IoError { source: e }),
        };
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, namespace: &str, id: u64, state: &AcpExecutionState) -> Result<(), AcpError> {
        let path = self.state_file(namespace, id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = serde_json::to_string_pretty(state)?;
        let temp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&temp, &rendered) {
            cleanup_temp(&temp, &e);
            return Err(AcpError::IoError { source: e });
        }
        if let Err(e) = std::fs::rename(&temp, &path) {
            cleanup_temp(&temp, &e);
            return Err(AcpError::IoError { source: e });
        }
        Ok(())
    }
}

fn cleanup_temp(temp: &std::path::Path, original: &std::io::Error) {
    if let Err(cleanup_err) = std::fs::remove_file(temp) {
        warn!(
            event = "acp.state.temp_cleanup_failed",
            temp_file = %temp.display(),
            original_error = %original,
            cleanup_error = %cleanup_err,
        );
    }
}
