//! Read-only git queries through git2.
//!
//! These never need credentials, so they avoid subprocess overhead and
//! stderr parsing.

use std::path::Path;

use git2::{BranchType, Repository, Status, StatusOptions};
use tracing::{debug, warn};

use super::errors::GitError;

pub fn open_repo(root: &Path) -> Result<Repository, GitError> {
    Repository::open(root).map_err(|_| GitError::NotInRepository)
}

/// Current branch of the repository; `DetachedHead` when there is none.
pub fn current_branch(root: &Path) -> Result<String, GitError> {
    let repo = open_repo(root)?;
    let head = repo.head()?;
    match head.shorthand() {
        Some(name) if name != "HEAD" => Ok(name.to_string()),
        _ => {
            debug!(event = "core.git.detached_head", path = %root.display());
            Err(GitError::DetachedHead)
        }
    }
}

pub fn branch_exists(root: &Path, branch: &str) -> Result<bool, GitError> {
    let repo = open_repo(root)?;
    Ok(repo.find_branch(branch, BranchType::Local).is_ok())
}

pub fn list_branches(root: &Path) -> Result<Vec<String>, GitError> {
    let repo = open_repo(root)?;
    let mut names = Vec::new();
    for branch in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()? {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Whether a work tree has staged, modified, or untracked changes.
///
/// Falls back to "dirty" when the status check itself fails, so callers
/// never destroy work on the strength of a failed probe.
pub fn has_uncommitted_changes(path: &Path) -> Result<bool, GitError> {
    let repo = Repository::open(path).map_err(|_| GitError::NotInRepository)?;

    let mut opts = StatusOptions::new();
    opts.include_untracked(true);
    opts.include_ignored(false);

    let statuses = match repo.statuses(Some(&mut opts)) {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!(
                event = "core.git.status_check_failed",
                path = %path.display(),
                error = %e,
                "Failed to get git status - assuming dirty to be safe"
            );
            return Ok(true);
        }
    };

    let dirty = statuses.iter().any(|entry| {
        entry.status().intersects(
            Status::INDEX_NEW
                | Status::INDEX_MODIFIED
                | Status::INDEX_DELETED
                | Status::INDEX_RENAMED
                | Status::INDEX_TYPECHANGE
                | Status::WT_NEW
                | Status::WT_MODIFIED
                | Status::WT_DELETED
                | Status::WT_RENAMED
                | Status::WT_TYPECHANGE,
        )
    });
    Ok(dirty)
}

/// The repository's default branch.
///
/// Resolution order: `origin/HEAD` symbolic target, then
/// `init.defaultBranch`, then whichever of `main`/`master` exists, then
/// `main`.
pub fn default_branch(root: &Path) -> Result<String, GitError> {
    let repo = open_repo(root)?;

    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD")
        && let Some(target) = reference.symbolic_target()
        && let Some(branch) = target.strip_prefix("refs/remotes/origin/")
    {
        return Ok(branch.to_string());
    }

    if let Ok(config) = repo.config()
        && let Ok(configured) = config.get_string("init.defaultBranch")
        && repo.find_branch(&configured, BranchType::Local).is_ok()
    {
        return Ok(configured);
    }

    for candidate in ["main", "master"] {
        if repo.find_branch(candidate, BranchType::Local).is_ok() {
            return Ok(candidate.to_string());
        }
    }
    Ok("main".to_string())
}

pub fn user_email(root: &Path) -> Result<String, GitError> {
    let repo = open_repo(root)?;
    let config = repo.config()?;
    config
        .get_string("user.email")
        .map_err(|_| GitError::OperationFailed {
            message: "git user.email is not configured".to_string(),
        })
}
