//! Session log files.
//!
//! Every session appends its output to `<crew_dir>/logs/<name>.log`. The
//! manager writes a fixed header before the session starts; readers tail
//! with cap-bounded reads so concurrent appends are safe.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::errors::SessionError;

const HEADER_RULE: &str =
    "================================================================================";

/// Cap applied to tail reads so a runaway log cannot balloon memory.
pub const TAIL_READ_CAP: u64 = 256 * 1024;

/// Write the session-log header. Creates parent directories and truncates
/// any previous log for the same session name.
pub fn write_log_header(
    path: &Path,
    session_name: &str,
    started_at: &str,
    working_dir: &Path,
    command: &str,
) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let header = format!(
        "{HEADER_RULE}\nSession: {session_name}\nStarted: {started_at}\nDirectory: {}\nCommand: {command}\n{HEADER_RULE}\n",
        working_dir.display()
    );
    std::fs::write(path, header)?;
    Ok(())
}

/// Current length of the log in bytes; 0 when it does not exist yet.
pub fn log_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read the log from `offset`, capped at `TAIL_READ_CAP` bytes from the
/// end. When the span past `offset` exceeds the cap, only the trailing cap
/// is returned.
pub fn read_from_offset(path: &Path, offset: u64) -> Result<String, SessionError> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(SessionError::IoError { source: e }),
    };

    let len = file.metadata()?.len();
    if offset >= len {
        return Ok(String::new());
    }

    let span = len - offset;
    let start = if span > TAIL_READ_CAP {
        len - TAIL_READ_CAP
    } else {
        offset
    };

    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// The last `n` lines of a log.
pub fn tail_lines(path: &Path, n: usize) -> Result<String, SessionError> {
    let len = log_len(path);
    let offset = len.saturating_sub(TAIL_READ_CAP);
    let content = read_from_offset(path, offset)?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn log_path(tmp: &tempfile::TempDir) -> PathBuf {
        tmp.path().join("logs").join("crew-1.log")
    }

    #[test]
    fn test_header_format_is_exact() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = log_path(&tmp);
        write_log_header(
            &path,
            "crew-1",
            "2026-02-01T10:00:00Z",
            Path::new("/repo/.crew/worktrees/crew-1"),
            "/repo/.crew/scripts/task-1.sh",
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let expected = "\
================================================================================
Session: crew-1
Started: 2026-02-01T10:00:00Z
Directory: /repo/.crew/worktrees/crew-1
Command: /repo/.crew/scripts/task-1.sh
================================================================================
";
        assert_eq!(content, expected);
    }

    #[test]
    fn test_header_truncates_previous_log() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = log_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale output\n").unwrap();

        write_log_header(&path, "crew-1", "2026-02-01T10:00:00Z", Path::new("/w"), "cmd").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale output"));
        assert!(content.starts_with(HEADER_RULE));
    }

    #[test]
    fn test_read_from_offset_slices() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = log_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "headerline\nrun output\n").unwrap();

        let all = read_from_offset(&path, 0).unwrap();
        assert!(all.starts_with("headerline"));

        let sliced = read_from_offset(&path, "headerline\n".len() as u64).unwrap();
        assert_eq!(sliced, "run output\n");
    }

    #[test]
    fn test_read_from_offset_past_end() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = log_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "abc").unwrap();
        assert_eq!(read_from_offset(&path, 100).unwrap(), "");
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert_eq!(read_from_offset(&log_path(&tmp), 0).unwrap(), "");
        assert_eq!(log_len(&log_path(&tmp)), 0);
    }

    #[test]
    fn test_read_caps_large_span() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = log_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        // 300 KiB of content; read from 0 must clamp to the trailing cap
        let chunk = "x".repeat(1024);
        let mut content = String::new();
        for _ in 0..300 {
            content.push_str(&chunk);
        }
        content.push_str("END");
        std::fs::write(&path, &content).unwrap();

        let read = read_from_offset(&path, 0).unwrap();
        assert!(read.len() as u64 <= TAIL_READ_CAP);
        assert!(read.ends_with("END"));
    }

    #[test]
    fn test_tail_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = log_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let lines: Vec<String> = (1..=30).map(|i| format!("line {i}")).collect();
        std::fs::write(&path, lines.join("\n")).unwrap();

        let tail = tail_lines(&path, 3).unwrap();
        assert_eq!(tail, "line 28\nline 29\nline 30");

        let all = tail_lines(&path, 100).unwrap();
        assert!(all.starts_with("line 1\n"));
    }
}
