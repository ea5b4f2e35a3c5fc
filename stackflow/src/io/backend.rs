//! Repository capability used by the interpreter.
//!
//! The [`Repository`] trait decouples opcode execution from how git is driven.
//! Production code uses the subprocess wrapper in [`crate::io::git`]; tests use
//! an in-memory fake.

use thiserror::Error;

use crate::core::branch::{BranchName, Sha};
use crate::core::snapshot::{BranchesSnapshot, StashSize};

/// Typed failure of a repository operation.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Merge, rebase or stash-pop stopped on conflicts the user must resolve.
    #[error("conflict during {operation}: {detail}")]
    Conflict { operation: String, detail: String },

    /// The remote could not be reached or refused our credentials.
    #[error("network error during {operation}: {detail}")]
    Network { operation: String, detail: String },

    #[error("{operation} timed out after {secs}s")]
    TimedOut { operation: String, secs: u64 },

    /// The repository is in a state the operation cannot work with.
    #[error("{operation} failed: {detail}")]
    Failed { operation: String, detail: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepoError {
    pub fn conflict(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        RepoError::Conflict {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    pub fn failed(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        RepoError::Failed {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RepoError::Conflict { .. })
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Blocking operations against one repository and its configured remote.
///
/// Query methods never change state. Every other method is a mutation and is
/// recorded instead of executed during a dry run.
pub trait Repository {
    // Queries.
    fn current_branch(&self) -> RepoResult<BranchName>;
    fn branches_snapshot(&self) -> RepoResult<BranchesSnapshot>;
    fn local_sha(&self, branch: &BranchName) -> RepoResult<Option<Sha>>;
    fn remote_sha(&self, branch: &BranchName) -> RepoResult<Option<Sha>>;
    fn stash_size(&self) -> RepoResult<StashSize>;
    fn has_open_changes(&self) -> RepoResult<bool>;
    fn has_unresolved_conflicts(&self) -> RepoResult<bool>;
    fn merge_in_progress(&self) -> RepoResult<bool>;
    fn rebase_in_progress(&self) -> RepoResult<bool>;
    /// Name of the configured remote (`origin`).
    fn remote_name(&self) -> &str;

    // Mutations.
    fn fetch(&self) -> RepoResult<()>;
    fn checkout(&self, branch: &BranchName) -> RepoResult<()>;
    fn create_branch(&self, branch: &BranchName, start: &Sha) -> RepoResult<()>;
    fn delete_local_branch(&self, branch: &BranchName) -> RepoResult<()>;
    /// Point `branch` at `sha`; hard-resets the worktree when it is checked out.
    fn reset_branch(&self, branch: &BranchName, sha: &Sha) -> RepoResult<()>;
    fn merge(&self, source: &str) -> RepoResult<()>;
    /// Conclude a merge whose conflicts have been resolved.
    fn commit_merge(&self) -> RepoResult<()>;
    fn abort_merge(&self) -> RepoResult<()>;
    fn rebase(&self, onto: &str) -> RepoResult<()>;
    fn continue_rebase(&self) -> RepoResult<()>;
    fn abort_rebase(&self) -> RepoResult<()>;
    /// Push `branch` to the remote with upstream tracking.
    fn push(&self, branch: &BranchName, force_with_lease: bool) -> RepoResult<()>;
    /// Force the remote branch to `sha`, creating it when absent.
    fn push_sha(&self, branch: &BranchName, sha: &Sha) -> RepoResult<()>;
    fn delete_remote_branch(&self, branch: &BranchName) -> RepoResult<()>;
    fn stash(&self) -> RepoResult<()>;
    fn stash_pop(&self) -> RepoResult<()>;
    fn stash_drop(&self) -> RepoResult<()>;
}
