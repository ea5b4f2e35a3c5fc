//! Point-in-time views of repository and configuration state.
//!
//! Snapshots are captured before a workflow starts and after it completes so
//! that undo can be verified against the state the user began with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::branch::{BranchName, BranchType, Lineage, Sha};

/// Local and remote position of a single branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: BranchName,
    pub local_sha: Option<Sha>,
    pub remote_sha: Option<Sha>,
}

impl BranchInfo {
    pub fn has_tracking_branch(&self) -> bool {
        self.remote_sha.is_some()
    }

    pub fn is_local(&self) -> bool {
        self.local_sha.is_some()
    }
}

/// All branches known locally or on the configured remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchesSnapshot {
    /// Checked out branch, `None` when HEAD is detached.
    pub active: Option<BranchName>,
    /// Sorted by branch name.
    pub branches: Vec<BranchInfo>,
}

impl BranchesSnapshot {
    pub fn find(&self, name: &BranchName) -> Option<&BranchInfo> {
        self.branches.iter().find(|info| &info.name == name)
    }

    /// True if the branch exists locally or remotely.
    pub fn contains(&self, name: &BranchName) -> bool {
        self.find(name).is_some()
    }

    pub fn has_local(&self, name: &BranchName) -> bool {
        self.find(name).is_some_and(BranchInfo::is_local)
    }

    pub fn has_tracking(&self, name: &BranchName) -> bool {
        self.find(name).is_some_and(BranchInfo::has_tracking_branch)
    }

    pub fn local_branches(&self) -> Vec<BranchName> {
        self.branches
            .iter()
            .filter(|info| info.is_local())
            .map(|info| info.name.clone())
            .collect()
    }
}

/// Configuration state that opcodes may change and undo must restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub lineage: Lineage,
    pub branch_types: BTreeMap<BranchName, BranchType>,
}

/// Number of entries on the git stash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StashSize(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_distinguish_local_and_tracking() {
        let snapshot = BranchesSnapshot {
            active: Some("main".into()),
            branches: vec![
                BranchInfo {
                    name: "main".into(),
                    local_sha: Some("111".into()),
                    remote_sha: Some("111".into()),
                },
                BranchInfo {
                    name: "local-only".into(),
                    local_sha: Some("222".into()),
                    remote_sha: None,
                },
                BranchInfo {
                    name: "remote-only".into(),
                    local_sha: None,
                    remote_sha: Some("333".into()),
                },
            ],
        };
        assert!(snapshot.has_tracking(&"main".into()));
        assert!(!snapshot.has_tracking(&"local-only".into()));
        assert!(!snapshot.has_local(&"remote-only".into()));
        assert!(snapshot.contains(&"remote-only".into()));
        assert!(!snapshot.contains(&"missing".into()));
        assert_eq!(
            snapshot.local_branches(),
            vec![BranchName::from("main"), BranchName::from("local-only")]
        );
    }
}
