//! Store migration: copy tasks and comments from a legacy store into the
//! current store, conflict-safe.

use tracing::{info, warn};

use super::errors::TaskError;
use super::status::STATUS_VERSION_CURRENT;
use super::store::{StoreInitializer, TaskFilter, TaskStore};
use super::types::Task;

#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Do not copy comments at all.
    pub skip_comments: bool,
    /// Treat a comment read failure as a hard failure instead of migrating
    /// the task commentless.
    pub strict_comments: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrateReport {
    pub migrated: usize,
    pub skipped: usize,
    pub skipped_comments: usize,
    /// Whether the final initialize pass repaired the destination sequence.
    pub repaired: bool,
}

/// Normalise a task for cross-store comparison: labels sorted, empty label
/// lists dropped, namespace cleared, status model brought to the current
/// version.
fn normalize_for_compare(task: &Task) -> Task {
    let mut normalized = task.clone();
    normalized.labels.sort();
    normalized.namespace = String::new();
    normalized.status_version = STATUS_VERSION_CURRENT;
    normalized
}

/// Migrate every task from `source` into `dest`.
///
/// Tasks already present and identical (after normalisation) are skipped;
/// divergent duplicates abort with `MigrationConflict`. A final
/// `initialize()` repairs the destination's `next_id` to `max(id) + 1`.
pub fn migrate(
    source: &dyn TaskStore,
    dest: &dyn TaskStore,
    dest_init: &dyn StoreInitializer,
    options: &MigrateOptions,
) -> Result<MigrateReport, TaskError> {
    dest_init.initialize()?;

    let mut report = MigrateReport::default();
    let source_tasks = source.list_all(&TaskFilter::all())?;

    info!(
        event = "core.migrate.started",
        task_count = source_tasks.len(),
        skip_comments = options.skip_comments,
        strict_comments = options.strict_comments,
    );

    for src_task in &source_tasks {
        let namespace = src_task.namespace_or_default();

        if let Some(existing) = dest.get(namespace, src_task.id)? {
            if normalize_for_compare(&existing) == normalize_for_compare(src_task) {
                report.skipped += 1;
                continue;
            }
            return Err(TaskError::MigrationConflict { id: src_task.id });
        }

        let comments = if options.skip_comments {
            Vec::new()
        } else {
            match source.get_comments(namespace, src_task.id) {
                Ok(comments) => comments,
                Err(e @ TaskError::CommentReadFailed { .. }) => {
                    if options.strict_comments {
                        return Err(e);
                    }
                    warn!(
                        event = "core.migrate.comments_skipped",
                        task_id = src_task.id,
                        error = %e,
                        "Comment read failed, migrating task commentless"
                    );
                    report.skipped_comments += 1;
                    Vec::new()
                }
                Err(e) => return Err(e),
            }
        };

        let mut migrated = src_task.clone();
        migrated.status_version = STATUS_VERSION_CURRENT;
        dest.save_task_with_comments(&migrated, &comments)?;
        report.migrated += 1;
    }

    report.repaired = dest_init.initialize()?;

    info!(
        event = "core.migrate.completed",
        migrated = report.migrated,
        skipped = report.skipped,
        skipped_comments = report.skipped_comments,
        repaired = report.repaired,
    );
    Ok(report)
}
