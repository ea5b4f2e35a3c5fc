//! Planners turn a command's intent plus prefetched repository data into a
//! program. Planners never touch the repository themselves.

pub mod delete;
pub mod propose;
pub mod sync;

use crate::core::branch::BranchName;
use crate::core::snapshot::{BranchesSnapshot, StashSize};

/// Read-only repository data gathered before planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoData {
    pub current: BranchName,
    pub branches: BranchesSnapshot,
    pub stash_size: StashSize,
    pub has_open_changes: bool,
}
