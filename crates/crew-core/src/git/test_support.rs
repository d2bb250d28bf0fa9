//! Test helpers for creating git repositories and branches.
//!
//! These functions wrap git2 operations so test code outside the `git/`
//! module doesn't need to import git2 directly.

use std::path::Path;

use git2::{BranchType, Repository, Signature};

use super::errors::GitError;

fn signature() -> Signature<'static> {
    Signature::now("Test", "test@test.com").unwrap()
}

/// Initialize a new git repository with a local identity and an initial
/// commit containing `README.md`.
pub fn init_repo_with_commit(path: &Path) -> Result<(), GitError> {
    let repo = Repository::init(path)?;
    let mut config = repo.config()?;
    config.set_str("user.name", "Test")?;
    config.set_str("user.email", "test@test.com")?;

    std::fs::write(path.join("README.md"), "# test\n")?;
    let sig = signature();
    let mut index = repo.index()?;
    index.add_path(Path::new("README.md"))?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])?;
    Ok(())
}

/// The branch HEAD currently points at.
pub fn head_branch(path: &Path) -> Result<String, GitError> {
    let repo = Repository::open(path)?;
    let head = repo.head()?;
    Ok(head.shorthand().unwrap_or("HEAD").to_string())
}

/// Create a local branch pointing at HEAD.
pub fn create_branch(path: &Path, name: &str) -> Result<(), GitError> {
    let repo = Repository::open(path)?;
    let commit = repo.head()?.peel_to_commit()?;
    repo.branch(name, &commit, false)?;
    Ok(())
}

/// Commit a file on the current branch.
pub fn commit_file(path: &Path, file: &str, content: &str, message: &str) -> Result<(), GitError> {
    let repo = Repository::open(path)?;
    std::fs::write(path.join(file), content)?;
    let sig = signature();
    let mut index = repo.index()?;
    index.add_path(Path::new(file))?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let parent = repo.head()?.peel_to_commit()?;
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
    Ok(())
}

/// Create a branch, commit one file on it, and return to the prior branch.
pub fn create_branch_with_file(
    path: &Path,
    branch: &str,
    file: &str,
    content: &str,
) -> Result<(), GitError> {
    let original = head_branch(path)?;
    create_branch(path, branch)?;
    checkout(path, branch)?;
    commit_file(path, file, content, &format!("Add {file}"))?;
    checkout(path, &original)?;
    Ok(())
}

/// Create a branch whose `file` commit conflicts with a commit of the same
/// file on the current branch.
pub fn create_conflicting_branches(path: &Path, branch: &str, file: &str) -> Result<(), GitError> {
    let original = head_branch(path)?;
    create_branch(path, branch)?;

    checkout(path, branch)?;
    commit_file(path, file, "branch version\n", "Branch change")?;

    checkout(path, &original)?;
    commit_file(path, file, "base version\n", "Base change")?;
    Ok(())
}

/// Check out a branch.
pub fn checkout(path: &Path, branch: &str) -> Result<(), GitError> {
    let repo = Repository::open(path)?;
    let reference = repo
        .find_branch(branch, BranchType::Local)?
        .into_reference();
    let tree = reference.peel_to_tree()?;
    repo.checkout_tree(tree.as_object(), None)?;
    repo.set_head(reference.name().unwrap())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_branching() {
        let tmp = tempfile::TempDir::new().unwrap();
        init_repo_with_commit(tmp.path()).unwrap();
        assert!(tmp.path().join("README.md").exists());

        create_branch(tmp.path(), "side").unwrap();
        checkout(tmp.path(), "side").unwrap();
        assert_eq!(head_branch(tmp.path()).unwrap(), "side");
    }

    #[test]
    fn test_conflicting_branch_setup() {
        let tmp = tempfile::TempDir::new().unwrap();
        init_repo_with_commit(tmp.path()).unwrap();
        create_conflicting_branches(tmp.path(), "other", "clash.txt").unwrap();

        // Both branches committed the same path with different content
        let content = std::fs::read_to_string(tmp.path().join("clash.txt")).unwrap();
        assert_eq!(content, "base version\n");
    }
}
