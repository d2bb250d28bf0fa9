//! ACP structured event log.
//!
//! Append-only JSONL, one event per line: UTC timestamp, type tag, the
//! current agent session id, and the marshalled payload. The writer owns
//! sole write access for the lifetime of one ACP run.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crew_paths::CrewPaths;

use crate::errors::AcpError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcpEvent {
    /// RFC 3339 UTC.
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
    pub payload: serde_json::Value,
}

impl AcpEvent {
    pub fn new(
        ts: impl Into<String>,
        event_type: impl Into<String>,
        session_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            ts: ts.into(),
            event_type: event_type.into(),
            session_id: session_id.into(),
            payload,
        }
    }
}

/// Sink for one run's events.
pub trait AcpEventWriter: Send + Sync {
    fn write(&self, event: &AcpEvent) -> Result<(), AcpError>;
    fn close(&self);
}

/// Creates per-task writers.
pub trait AcpEventWriterFactory: Send + Sync {
    fn for_task(&self, namespace: &str, id: u64) -> Result<Box<dyn AcpEventWriter>, AcpError>;
}

/// JSONL file writer under `<crew_dir>/acp/<ns>/task-<id>.events.jsonl`.
pub struct FsAcpEventWriter {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl FsAcpEventWriter {
    pub fn open(path: &Path) -> Result<Self, AcpError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }
}

impl AcpEventWriter for FsAcpEventWriter {
    fn write(&self, event: &AcpEvent) -> Result<(), AcpError> {
        let mut guard = self.file.lock().unwrap();
        let Some(file) = guard.as_mut() else {
            warn!(
                event = "acp.events.write_after_close",
                path = %self.path.display(),
            );
            return Ok(());
        };
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn close(&self) {
        if let Some(file) = self.file.lock().unwrap().take()
            && let Err(e) = file.sync_all()
        {
            warn!(
                event = "acp.events.close_sync_failed",
                path = %self.path.display(),
                error = %e,
            );
        }
    }
}

impl Drop for FsAcpEventWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Factory for the filesystem writer.
pub struct FsAcpEventWriterFactory {
    paths: CrewPaths,
}

impl FsAcpEventWriterFactory {
    pub fn new(paths: CrewPaths) -> Self {
        Self { paths }
    }
}

impl AcpEventWriterFactory for FsAcpEventWriterFactory {
    fn for_task(&self, namespace: &str, id: u64) -> Result<Box<dyn AcpEventWriter>, AcpError> {
        Ok(Box::new(FsAcpEventWriter::open(
            &self.paths.acp_events_file(namespace, id),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_append_as_jsonl() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        let writer = FsAcpEventWriter::open(&path).unwrap();

        writer
            .write(&AcpEvent::new(
                "2026-02-01T10:00:00Z",
                "prompt_sent",
                "sess-1",
                serde_json::json!({"text": "hello"}),
            ))
            .unwrap();
        writer
            .write(&AcpEvent::new(
                "2026-02-01T10:00:01Z",
                "session_end",
                "sess-1",
                serde_json::json!({"reason": "stop"}),
            ))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AcpEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event_type, "prompt_sent");
        assert_eq!(first.session_id, "sess-1");
        assert_eq!(first.payload["text"], "hello");

        let raw: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(raw["type"], "session_end");
    }

    #[test]
    fn test_writer_appends_across_runs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        {
            let writer = FsAcpEventWriter::open(&path).unwrap();
            writer
                .write(&AcpEvent::new("t1", "session_end", "a", serde_json::json!({})))
                .unwrap();
        }
        {
            let writer = FsAcpEventWriter::open(&path).unwrap();
            writer
                .write(&AcpEvent::new("t2", "prompt_sent", "b", serde_json::json!({})))
                .unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_write_after_close_is_swallowed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        let writer = FsAcpEventWriter::open(&path).unwrap();
        writer.close();
        // Not an error; the event is dropped with a warning
        writer
            .write(&AcpEvent::new("t", "late", "s", serde_json::json!({})))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_factory_places_log_per_task() {
        let tmp = tempfile::TempDir::new().unwrap();
        let factory = FsAcpEventWriterFactory::new(CrewPaths::from_dir(tmp.path().join("crew")));
        let writer = factory.for_task("Team Alpha", 3).unwrap();
        writer
            .write(&AcpEvent::new("t", "prompt_sent", "s", serde_json::json!({})))
            .unwrap();

        assert!(
            tmp.path()
                .join("crew")
                .join("acp")
                .join("team-alpha")
                .join("task-3.events.jsonl")
                .exists()
        );
    }
}
