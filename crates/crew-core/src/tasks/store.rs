//! Task persistence.
//!
//! `FsTaskStore` keeps one pretty-printed JSON file per task under
//! `tasks/<namespace>/task-<id>.json`, comments in a sidecar
//! `task-<id>.comments.json`, and a per-namespace `meta.json` carrying the
//! id sequence. All writes go through atomic temp-file + rename.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crew_paths::{CrewPaths, slugify_namespace};

use super::errors::TaskError;
use super::types::{Comment, Task, VALID_COMMENT_TYPES};
use crate::tasks::status::TaskStatus;

/// Filter for `list` / `list_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub label: Option<String>,
    pub parent_id: Option<u64>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status
            && task.status != status
        {
            return false;
        }
        if let Some(ref label) = self.label
            && !task.labels.contains(label)
        {
            return false;
        }
        if let Some(parent_id) = self.parent_id
            && task.parent_id != Some(parent_id)
        {
            return false;
        }
        true
    }
}

/// Persistent task repository.
pub trait TaskStore: Send + Sync {
    /// `Ok(None)` when the task does not exist.
    fn get(&self, namespace: &str, id: u64) -> Result<Option<Task>, TaskError>;
    /// Upsert a task row.
    fn save(&self, task: &Task) -> Result<(), TaskError>;
    /// Allocate the next id for a namespace. Never repeats a value, even
    /// across crashes.
    fn next_id(&self, namespace: &str) -> Result<u64, TaskError>;
    fn list(&self, namespace: &str, filter: &TaskFilter) -> Result<Vec<Task>, TaskError>;
    fn list_all(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError>;
    fn get_children(&self, namespace: &str, id: u64) -> Result<Vec<Task>, TaskError>;
    fn delete(&self, namespace: &str, id: u64) -> Result<(), TaskError>;
    fn add_comment(&self, namespace: &str, id: u64, comment: Comment) -> Result<(), TaskError>;
    fn get_comments(&self, namespace: &str, id: u64) -> Result<Vec<Comment>, TaskError>;
    fn update_comment(
        &self,
        namespace: &str,
        id: u64,
        index: usize,
        comment: Comment,
    ) -> Result<(), TaskError>;
    /// Atomic upsert of a task and its full comment list.
    fn save_task_with_comments(&self, task: &Task, comments: &[Comment]) -> Result<(), TaskError>;
    fn snapshot(&self, label: &str) -> Result<(), TaskError>;
    fn restore(&self, label: &str) -> Result<(), TaskError>;
    /// Delete all but the `keep` newest snapshots; returns how many were
    /// removed.
    fn prune_snapshots(&self, keep: usize) -> Result<usize, TaskError>;
    fn push(&self) -> Result<(), TaskError>;
    fn fetch(&self) -> Result<(), TaskError>;
    fn list_namespaces(&self) -> Result<Vec<String>, TaskError>;
}

/// Store bootstrap and repair.
pub trait StoreInitializer: Send + Sync {
    fn is_initialized(&self) -> bool;
    /// Create the layout and repair each namespace's `next_id` to
    /// `max(id) + 1`. Returns whether anything was repaired.
    fn initialize(&self) -> Result<bool, TaskError>;
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct NamespaceMeta {
    next_id: u64,
}

/// Filesystem-backed task store.
pub struct FsTaskStore {
    root: PathBuf,
    snapshots: PathBuf,
    /// Serialises writes; concurrent readers are safe against the atomic
    /// renames.
    write_lock: Mutex<()>,
}

impl FsTaskStore {
    pub fn new(paths: &CrewPaths) -> Self {
        Self::from_dirs(paths.tasks_dir(), paths.snapshots_dir())
    }

    pub fn from_dirs(root: PathBuf, snapshots: PathBuf) -> Self {
        Self {
            root,
            snapshots,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(slugify_namespace(namespace))
    }

    fn task_file(&self, namespace: &str, id: u64) -> PathBuf {
        self.namespace_dir(namespace).join(format!("task-{id}.json"))
    }

    fn comments_file(&self, namespace: &str, id: u64) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("task-{id}.comments.json"))
    }

    fn meta_file(&self, namespace: &str) -> PathBuf {
        self.namespace_dir(namespace).join("meta.json")
    }

    fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), TaskError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered =
            serde_json::to_string_pretty(value).map_err(TaskError::serialization)?;
        let temp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&temp, &rendered) {
            cleanup_temp_file(&temp, &e);
            return Err(TaskError::IoError { source: e });
        }
        if let Err(e) = std::fs::rename(&temp, path) {
            cleanup_temp_file(&temp, &e);
            return Err(TaskError::IoError { source: e });
        }
        Ok(())
    }

    fn read_meta(&self, namespace: &str) -> Result<NamespaceMeta, TaskError> {
        let path = self.meta_file(namespace);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(TaskError::serialization)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(NamespaceMeta { next_id: 1 })
            }
            Err(e) => Err(TaskError::IoError { source: e }),
        }
    }

    fn read_task_file(path: &Path) -> Option<Task> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    event = "core.tasks.load_read_error",
                    file = %path.display(),
                    error = %e,
                    "Failed to read task file, skipping"
                );
                return None;
            }
        };
        match serde_json::from_str::<Task>(&content) {
            Ok(task) => Some(task),
            Err(e) => {
                warn!(
                    event = "core.tasks.load_invalid_json",
                    file = %path.display(),
                    error = %e,
                    "Failed to parse task JSON, skipping"
                );
                None
            }
        }
    }

    fn list_namespace_tasks(&self, dir: &Path) -> Result<Vec<Task>, TaskError> {
        let mut tasks = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tasks),
            Err(e) => return Err(TaskError::IoError { source: e }),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("task-")
                || !name.ends_with(".json")
                || name.ends_with(".comments.json")
            {
                continue;
            }
            if let Some(task) = Self::read_task_file(&path) {
                tasks.push(task);
            }
        }

        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    fn git_in_store_root(&self, args: &[&str]) -> Result<(), TaskError> {
        let probe = std::process::Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["rev-parse", "--is-inside-work-tree"])
            .output();

        let inside = matches!(&probe, Ok(out) if out.status.success());
        if !inside {
            warn!(
                event = "core.tasks.store_sync_skipped",
                root = %self.root.display(),
                args = ?args,
                "Task store root is not inside a git work tree, skipping sync"
            );
            return Ok(());
        }

        let output = std::process::Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()?;

        if output.status.success() {
            info!(event = "core.tasks.store_sync_completed", args = ?args);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(TaskError::IoError {
                source: std::io::Error::other(format!(
                    "git {} failed: {}",
                    args.join(" "),
                    stderr.trim()
                )),
            })
        }
    }
}

fn cleanup_temp_file(temp_file: &Path, original_error: &std::io::Error) {
    if let Err(cleanup_err) = std::fs::remove_file(temp_file) {
        warn!(
            event = "core.tasks.temp_file_cleanup_failed",
            temp_file = %temp_file.display(),
            original_error = %original_error,
            cleanup_error = %cleanup_err,
            "Failed to clean up temp file after write error"
        );
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn validate_comment(comment: &Comment) -> Result<(), TaskError> {
    if comment.text.trim().is_empty() {
        return Err(TaskError::EmptyMessage);
    }
    if let Some(ref comment_type) = comment.comment_type
        && !VALID_COMMENT_TYPES.contains(&comment_type.as_str())
    {
        return Err(TaskError::InvalidCommentType {
            value: comment_type.clone(),
        });
    }
    Ok(())
}

impl TaskStore for FsTaskStore {
    fn get(&self, namespace: &str, id: u64) -> Result<Option<Task>, TaskError> {
        let path = self.task_file(namespace, id);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let task =
                    serde_json::from_str(&content).map_err(TaskError::serialization)?;
                Ok(Some(task))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TaskError::IoError { source: e }),
        }
    }

    fn save(&self, task: &Task) -> Result<(), TaskError> {
        let _guard = self.write_lock.lock().unwrap();
        let path = self.task_file(task.namespace_or_default(), task.id);
        Self::write_json_atomic(&path, task)?;
        debug!(
            event = "core.tasks.saved",
            task_id = task.id,
            namespace = task.namespace_or_default(),
            status = %task.status,
        );
        Ok(())
    }

    fn next_id(&self, namespace: &str) -> Result<u64, TaskError> {
        let _guard = self.write_lock.lock().unwrap();
        let meta = self.read_meta(namespace)?;
        let id = meta.next_id.max(1);
        // Persist the advanced sequence before handing the id out so a crash
        // after allocation can only skip ids, never reissue one.
        Self::write_json_atomic(
            &self.meta_file(namespace),
            &NamespaceMeta { next_id: id + 1 },
        )?;
        Ok(id)
    }

    fn list(&self, namespace: &str, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        let tasks = self.list_namespace_tasks(&self.namespace_dir(namespace))?;
        Ok(tasks.into_iter().filter(|t| filter.matches(t)).collect())
    }

    fn list_all(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        let mut tasks = Vec::new();
        for namespace in self.list_namespaces()? {
            tasks.extend(self.list(&namespace, filter)?);
        }
        Ok(tasks)
    }

    fn get_children(&self, namespace: &str, id: u64) -> Result<Vec<Task>, TaskError> {
        self.list(
            namespace,
            &TaskFilter {
                parent_id: Some(id),
                ..TaskFilter::default()
            },
        )
    }

    fn delete(&self, namespace: &str, id: u64) -> Result<(), TaskError> {
        let _guard = self.write_lock.lock().unwrap();
        let path = self.task_file(namespace, id);
        if !path.exists() {
            return Err(TaskError::TaskNotFound { id });
        }
        std::fs::remove_file(&path)?;
        let comments = self.comments_file(namespace, id);
        if comments.exists() {
            std::fs::remove_file(&comments)?;
        }
        info!(event = "core.tasks.deleted", task_id = id, namespace = namespace);
        Ok(())
    }

    fn add_comment(&self, namespace: &str, id: u64, comment: Comment) -> Result<(), TaskError> {
        validate_comment(&comment)?;
        if self.get(namespace, id)?.is_none() {
            return Err(TaskError::TaskNotFound { id });
        }
        let _guard = self.write_lock.lock().unwrap();
        let mut comments = self.read_comments(namespace, id)?;
        comments.push(comment);
        Self::write_json_atomic(&self.comments_file(namespace, id), &comments)
    }

    fn get_comments(&self, namespace: &str, id: u64) -> Result<Vec<Comment>, TaskError> {
        self.read_comments(namespace, id)
    }

    fn update_comment(
        &self,
        namespace: &str,
        id: u64,
        index: usize,
        comment: Comment,
    ) -> Result<(), TaskError> {
        validate_comment(&comment)?;
        let _guard = self.write_lock.lock().unwrap();
        let mut comments = self.read_comments(namespace, id)?;
        if index >= comments.len() {
            return Err(TaskError::CommentNotFound { id, index });
        }
        comments[index] = comment;
        Self::write_json_atomic(&self.comments_file(namespace, id), &comments)
    }

    fn save_task_with_comments(&self, task: &Task, comments: &[Comment]) -> Result<(), TaskError> {
        for comment in comments {
            validate_comment(comment)?;
        }
        let _guard = self.write_lock.lock().unwrap();
        let namespace = task.namespace_or_default();
        Self::write_json_atomic(&self.comments_file(namespace, task.id), &comments.to_vec())?;
        Self::write_json_atomic(&self.task_file(namespace, task.id), task)
    }

    fn snapshot(&self, label: &str) -> Result<(), TaskError> {
        let _guard = self.write_lock.lock().unwrap();
        let target = self.snapshots.join(label.replace('/', "-"));
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
        }
        copy_dir_recursive(&self.root, &target)?;
        info!(event = "core.tasks.snapshot_created", label = label);
        Ok(())
    }

    fn restore(&self, label: &str) -> Result<(), TaskError> {
        let _guard = self.write_lock.lock().unwrap();
        let source = self.snapshots.join(label.replace('/', "-"));
        if !source.exists() {
            return Err(TaskError::SnapshotNotFound {
                label: label.to_string(),
            });
        }
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        copy_dir_recursive(&source, &self.root)?;
        info!(event = "core.tasks.snapshot_restored", label = label);
        Ok(())
    }

    fn prune_snapshots(&self, keep: usize) -> Result<usize, TaskError> {
        let _guard = self.write_lock.lock().unwrap();
        let entries = match std::fs::read_dir(&self.snapshots) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(TaskError::IoError { source: e }),
        };

        let mut snapshots: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let modified = entry.metadata()?.modified()?;
                snapshots.push((modified, entry.path()));
            }
        }

        // Newest first; everything past `keep` goes.
        snapshots.sort_by(|a, b| b.0.cmp(&a.0));
        let mut removed = 0;
        for (_, path) in snapshots.into_iter().skip(keep) {
            std::fs::remove_dir_all(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn push(&self) -> Result<(), TaskError> {
        self.git_in_store_root(&["push"])
    }

    fn fetch(&self) -> Result<(), TaskError> {
        self.git_in_store_root(&["fetch"])
    }

    fn list_namespaces(&self) -> Result<Vec<String>, TaskError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TaskError::IoError { source: e }),
        };

        let mut namespaces = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                namespaces.insert(name.to_string());
            }
        }
        Ok(namespaces.into_iter().collect())
    }
}

impl FsTaskStore {
    fn read_comments(&self, namespace: &str, id: u64) -> Result<Vec<Comment>, TaskError> {
        let path = self.comments_file(namespace, id);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                TaskError::CommentReadFailed {
                    id,
                    message: e.to_string(),
                }
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(TaskError::CommentReadFailed {
                id,
                message: e.to_string(),
            }),
        }
    }
}

impl StoreInitializer for FsTaskStore {
    fn is_initialized(&self) -> bool {
        self.root.exists()
    }

    fn initialize(&self) -> Result<bool, TaskError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut repaired = false;

        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            repaired = true;
        }

        let namespaces: Vec<String> = {
            // Re-scan without taking the lock again
            let entries = std::fs::read_dir(&self.root)?;
            let mut namespaces = Vec::new();
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir()
                    && let Some(name) = entry.file_name().to_str()
                {
                    namespaces.push(name.to_string());
                }
            }
            namespaces
        };

        for namespace in namespaces {
            let tasks = self.list_namespace_tasks(&self.namespace_dir(&namespace))?;
            let max_id = tasks.iter().map(|t| t.id).max().unwrap_or(0);
            let meta = self.read_meta(&namespace)?;
            if meta.next_id <= max_id {
                Self::write_json_atomic(
                    &self.meta_file(&namespace),
                    &NamespaceMeta { next_id: max_id + 1 },
                )?;
                info!(
                    event = "core.tasks.next_id_repaired",
                    namespace = %namespace,
                    next_id = max_id + 1,
                );
                repaired = true;
            }
        }

        Ok(repaired)
    }
}
