//! Task-draft document parsing.
//!
//! A draft file is a sequence of `---`-fenced front-matter blocks, each
//! followed by free text that becomes the task description:
//!
//! ```text
//! ---
//! title: Phase 1
//! labels: [backend]
//! ---
//! Phase 1 description.
//!
//! ---
//! title: Phase 2
//! parent: 1
//! ---
//! Phase 2 description.
//! ```
//!
//! `parent:` is either a 1-based index of an earlier draft in the same file
//! or `#<id>` referencing an existing task. Parsing is pure: no store access
//! happens here.

use super::errors::TaskError;

/// Parent reference in a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    /// 1-based index of an earlier draft in the same document.
    Relative(usize),
    /// Absolute id of an existing task (`#<id>` syntax).
    Absolute(u64),
}

/// One parsed draft, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskDraft {
    pub title: String,
    pub labels: Vec<String>,
    pub description: String,
    pub parent: Option<ParentRef>,
}

/// Parse a draft document into ordered drafts.
pub fn parse_drafts(content: &str) -> Result<Vec<TaskDraft>, TaskError> {
    let content = content.replace("\r\n", "\n");
    let lines: Vec<&str> = content.lines().collect();

    let mut drafts = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        // Skip blank lines between drafts
        while i < lines.len() && lines[i].trim().is_empty() {
            i += 1;
        }
        if i >= lines.len() {
            break;
        }

        if lines[i].trim() != "---" {
            return Err(TaskError::InvalidDraft {
                message: format!("unexpected content outside a draft: '{}'", lines[i].trim()),
            });
        }
        i += 1;

        // Front-matter block until the closing fence
        let mut draft = TaskDraft::default();
        let mut closed = false;
        while i < lines.len() {
            let line = lines[i];
            if line.trim() == "---" {
                closed = true;
                i += 1;
                break;
            }
            parse_front_matter_line(line, &mut draft)?;
            i += 1;
        }
        if !closed {
            return Err(TaskError::InvalidDraft {
                message: "unterminated front matter".to_string(),
            });
        }

        // Description runs until the next opening fence
        let mut description_lines = Vec::new();
        while i < lines.len() && lines[i].trim() != "---" {
            description_lines.push(lines[i]);
            i += 1;
        }
        draft.description = description_lines.join("\n").trim().to_string();

        if draft.title.trim().is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        drafts.push(draft);
    }

    if drafts.is_empty() {
        return Err(TaskError::EmptyFile);
    }
    Ok(drafts)
}

fn parse_front_matter_line(line: &str, draft: &mut TaskDraft) -> Result<(), TaskError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(());
    }

    let Some((key, value)) = trimmed.split_once(':') else {
        // Stray text in front matter is tolerated, matching lenient
        // hand-edited files.
        return Ok(());
    };
    let value = value.trim();

    match key.trim() {
        "title" => draft.title = value.to_string(),
        "labels" => draft.labels = parse_labels(value),
        "parent" => draft.parent = Some(parse_parent_ref(value)?),
        _ => {}
    }
    Ok(())
}

fn parse_labels(value: &str) -> Vec<String> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);
    inner
        .split(',')
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .collect()
}

fn parse_parent_ref(value: &str) -> Result<ParentRef, TaskError> {
    let invalid = || TaskError::InvalidParentRef {
        reference: value.to_string(),
    };

    if let Some(id) = value.strip_prefix('#') {
        let id: u64 = id.parse().map_err(|_| invalid())?;
        if id == 0 {
            return Err(invalid());
        }
        return Ok(ParentRef::Absolute(id));
    }

    let index: usize = value.parse().map_err(|_| invalid())?;
    if index == 0 {
        return Err(invalid());
    }
    Ok(ParentRef::Relative(index))
}
