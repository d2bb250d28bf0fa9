//! Git adapter.
//!
//! The `Git` trait is the capability the lifecycle use-cases consume; the
//! `GitCli` implementation mixes git2 queries with validated `git` CLI
//! invocations.

pub mod cli;
pub mod errors;
pub mod query;
pub mod test_support;

use std::path::{Path, PathBuf};

pub use errors::GitError;

/// Branch / merge / conflict / default-branch queries against one
/// repository.
pub trait Git: Send + Sync {
    fn current_branch(&self) -> Result<String, GitError>;
    fn branch_exists(&self, branch: &str) -> Result<bool, GitError>;
    /// Whether the work tree at `path` has staged, modified, or untracked
    /// changes.
    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, GitError>;
    fn has_merge_conflict(&self, branch: &str, base: &str) -> Result<bool, GitError>;
    fn merge_conflict_files(&self, branch: &str, base: &str) -> Result<Vec<String>, GitError>;
    /// Merge `branch` into the current branch; conflicts surface as
    /// `MergeConflict` with the work tree left for manual resolution.
    fn merge(&self, branch: &str, no_ff: bool) -> Result<(), GitError>;
    fn delete_branch(&self, branch: &str, force: bool) -> Result<(), GitError>;
    fn list_branches(&self) -> Result<Vec<String>, GitError>;
    fn default_branch(&self) -> Result<String, GitError>;
    fn user_email(&self) -> Result<String, GitError>;
    fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError>;
    fn push(&self, remote: &str, branch: &str) -> Result<(), GitError>;
}

/// Production git adapter rooted at one repository.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Git for GitCli {
    fn current_branch(&self) -> Result<String, GitError> {
        query::current_branch(&self.root)
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        query::branch_exists(&self.root, branch)
    }

    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, GitError> {
        query::has_uncommitted_changes(path)
    }

    fn has_merge_conflict(&self, branch: &str, base: &str) -> Result<bool, GitError> {
        Ok(!cli::merge_conflict_files(&self.root, branch, base)?.is_empty())
    }

    fn merge_conflict_files(&self, branch: &str, base: &str) -> Result<Vec<String>, GitError> {
        cli::merge_conflict_files(&self.root, branch, base)
    }

    fn merge(&self, branch: &str, no_ff: bool) -> Result<(), GitError> {
        cli::merge(&self.root, branch, no_ff)
    }

    fn delete_branch(&self, branch: &str, force: bool) -> Result<(), GitError> {
        cli::delete_branch(&self.root, branch, force)
    }

    fn list_branches(&self) -> Result<Vec<String>, GitError> {
        query::list_branches(&self.root)
    }

    fn default_branch(&self) -> Result<String, GitError> {
        query::default_branch(&self.root)
    }

    fn user_email(&self) -> Result<String, GitError> {
        query::user_email(&self.root)
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        cli::fetch(&self.root, remote, branch)
    }

    fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        cli::push(&self.root, remote, branch)
    }
}
