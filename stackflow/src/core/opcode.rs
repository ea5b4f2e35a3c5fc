//! The opcode catalog: atomic, individually reversible workflow actions.
//!
//! Opcodes are plain values. How they execute against a repository lives in
//! `vm::exec`; this module only describes them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::branch::{BranchName, Sha};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Opcode {
    /// Update remote-tracking refs from the configured remote.
    Fetch,
    Checkout {
        branch: BranchName,
    },
    CreateBranch {
        branch: BranchName,
        start: Sha,
    },
    /// Force-delete a local branch. No-op when it does not exist.
    DeleteLocalBranch {
        branch: BranchName,
    },
    /// Move a local branch to `sha`, hard-resetting the worktree if it is checked out.
    ResetBranchToSha {
        branch: BranchName,
        sha: Sha,
    },
    /// Merge `source` (a branch or remote-tracking ref) into the checked out `branch`.
    Merge {
        branch: BranchName,
        source: String,
    },
    /// Rebase the checked out `branch` onto `onto`.
    Rebase {
        branch: BranchName,
        onto: String,
    },
    /// Push to the tracking branch, creating it when absent.
    PushCurrentBranch {
        branch: BranchName,
    },
    ForcePushCurrentBranch {
        branch: BranchName,
    },
    /// Push with upstream only if the branch has no tracking branch yet.
    PushCurrentBranchIfLocal {
        branch: BranchName,
    },
    /// Force the remote branch to `sha`, creating it when absent.
    ResetRemoteBranchToSha {
        branch: BranchName,
        sha: Sha,
    },
    /// Delete the remote branch. No-op when it does not exist.
    DeleteTrackingBranch {
        branch: BranchName,
    },
    StashOpenChanges,
    /// Pop the stash. `conflicted` is set once a pop by this opcode stopped
    /// on a conflict: the changes are then already in the worktree and only
    /// the stash entry is left to drop.
    RestoreOpenChanges {
        #[serde(default)]
        conflicted: bool,
    },
    LineageParentSet {
        branch: BranchName,
        parent: BranchName,
    },
    LineageParentRemove {
        branch: BranchName,
    },
    ProposalCreate {
        branch: BranchName,
        parent: BranchName,
        title: Option<String>,
        body: Option<String>,
    },
    BrowserOpen {
        url: String,
    },
    /// Separates the opcodes of one branch from the next. `skip` drops
    /// everything up to and including the next marker.
    EndOfBranchProgram,
}

impl Opcode {
    /// Branch this opcode operates on, if any.
    pub fn branch(&self) -> Option<&BranchName> {
        match self {
            Opcode::Checkout { branch }
            | Opcode::CreateBranch { branch, .. }
            | Opcode::DeleteLocalBranch { branch }
            | Opcode::ResetBranchToSha { branch, .. }
            | Opcode::Merge { branch, .. }
            | Opcode::Rebase { branch, .. }
            | Opcode::PushCurrentBranch { branch }
            | Opcode::ForcePushCurrentBranch { branch }
            | Opcode::PushCurrentBranchIfLocal { branch }
            | Opcode::ResetRemoteBranchToSha { branch, .. }
            | Opcode::DeleteTrackingBranch { branch }
            | Opcode::LineageParentSet { branch, .. }
            | Opcode::LineageParentRemove { branch }
            | Opcode::ProposalCreate { branch, .. } => Some(branch),
            Opcode::Fetch
            | Opcode::StashOpenChanges
            | Opcode::RestoreOpenChanges { .. }
            | Opcode::BrowserOpen { .. }
            | Opcode::EndOfBranchProgram => None,
        }
    }

    /// Every branch named by this opcode.
    pub fn branches(&self) -> Vec<&BranchName> {
        let mut out: Vec<&BranchName> = self.branch().into_iter().collect();
        match self {
            Opcode::LineageParentSet { parent, .. } | Opcode::ProposalCreate { parent, .. } => {
                out.push(parent);
            }
            _ => {}
        }
        out
    }

    /// Whether a conflict while running this opcode suspends the workflow
    /// instead of aborting it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Opcode::Merge { .. } | Opcode::Rebase { .. } | Opcode::RestoreOpenChanges { .. }
        )
    }

    /// Whether `skip` may be used while suspended on this opcode.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Opcode::Merge { .. } | Opcode::Rebase { .. })
    }

    /// Branch whose remote counterpart this opcode writes to.
    pub fn pushed_branch(&self) -> Option<&BranchName> {
        match self {
            Opcode::PushCurrentBranch { branch }
            | Opcode::ForcePushCurrentBranch { branch }
            | Opcode::PushCurrentBranchIfLocal { branch }
            | Opcode::ResetRemoteBranchToSha { branch, .. } => Some(branch),
            _ => None,
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Opcode::EndOfBranchProgram)
    }

    /// The opcode to retry after this one stopped on a conflict.
    pub fn after_conflict(&self) -> Opcode {
        match self {
            Opcode::RestoreOpenChanges { .. } => Opcode::RestoreOpenChanges { conflicted: true },
            other => other.clone(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Fetch => write!(f, "git fetch --prune"),
            Opcode::Checkout { branch } => write!(f, "git checkout {branch}"),
            Opcode::CreateBranch { branch, start } => write!(f, "git branch {branch} {start}"),
            Opcode::DeleteLocalBranch { branch } => write!(f, "git branch -D {branch}"),
            Opcode::ResetBranchToSha { branch, sha } => {
                write!(f, "reset {branch} to {sha}")
            }
            Opcode::Merge { source, .. } => write!(f, "git merge --no-edit {source}"),
            Opcode::Rebase { onto, .. } => write!(f, "git rebase {onto}"),
            Opcode::PushCurrentBranch { branch } => write!(f, "git push -u {branch}"),
            Opcode::ForcePushCurrentBranch { branch } => {
                write!(f, "git push --force-with-lease {branch}")
            }
            Opcode::PushCurrentBranchIfLocal { branch } => {
                write!(f, "git push -u {branch} (if local only)")
            }
            Opcode::ResetRemoteBranchToSha { branch, sha } => {
                write!(f, "git push --force {sha}:refs/heads/{branch}")
            }
            Opcode::DeleteTrackingBranch { branch } => {
                write!(f, "git push --delete {branch}")
            }
            Opcode::StashOpenChanges => write!(f, "git stash push --include-untracked"),
            Opcode::RestoreOpenChanges { conflicted: false } => write!(f, "git stash pop"),
            Opcode::RestoreOpenChanges { conflicted: true } => {
                write!(f, "git stash drop (changes already restored)")
            }
            Opcode::LineageParentSet { branch, parent } => {
                write!(f, "set parent of {branch} to {parent}")
            }
            Opcode::LineageParentRemove { branch } => write!(f, "remove parent of {branch}"),
            Opcode::ProposalCreate { branch, parent, .. } => {
                write!(f, "create proposal {branch} -> {parent}")
            }
            Opcode::BrowserOpen { url } => write!(f, "open {url}"),
            Opcode::EndOfBranchProgram => write!(f, "(end of branch)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let op = Opcode::Merge {
            branch: "feature".into(),
            source: "origin/feature".into(),
        };
        let json = serde_json::to_string(&op).expect("serialize");
        assert_eq!(
            json,
            r#"{"type":"merge","branch":"feature","source":"origin/feature"}"#
        );
        let marker = serde_json::to_string(&Opcode::EndOfBranchProgram).expect("serialize");
        assert_eq!(marker, r#"{"type":"end_of_branch_program"}"#);
    }

    #[test]
    fn only_merge_rebase_and_stash_pop_are_recoverable() {
        assert!(
            Opcode::Rebase {
                branch: "a".into(),
                onto: "main".into()
            }
            .is_recoverable()
        );
        let restore = Opcode::RestoreOpenChanges { conflicted: false };
        assert!(restore.is_recoverable());
        assert!(!Opcode::PushCurrentBranch { branch: "a".into() }.is_recoverable());
        assert!(!restore.is_skippable());
    }

    /// A stash pop that stopped on a conflict is retried as a drop; every
    /// other opcode is retried unchanged.
    #[test]
    fn only_a_conflicted_stash_pop_changes_on_retry() {
        assert_eq!(
            Opcode::RestoreOpenChanges { conflicted: false }.after_conflict(),
            Opcode::RestoreOpenChanges { conflicted: true }
        );
        let merge = Opcode::Merge {
            branch: "a".into(),
            source: "main".into(),
        };
        assert_eq!(merge.after_conflict(), merge);
    }

    #[test]
    fn restore_without_the_flag_still_deserializes() {
        let op: Opcode =
            serde_json::from_str(r#"{"type":"restore_open_changes"}"#).expect("deserialize");
        assert_eq!(op, Opcode::RestoreOpenChanges { conflicted: false });
    }

    #[test]
    fn branches_include_parent_of_lineage_changes() {
        let op = Opcode::LineageParentSet {
            branch: "child".into(),
            parent: "parent".into(),
        };
        let names: Vec<&str> = op.branches().into_iter().map(BranchName::as_str).collect();
        assert_eq!(names, vec!["child", "parent"]);
    }
}
