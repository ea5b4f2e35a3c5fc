//! Planning `stackflow sync`.

use anyhow::{Result, bail};
use tracing::debug;

use crate::core::branch::{BranchName, BranchType};
use crate::core::opcode::Opcode;
use crate::core::optimizer::optimize;
use crate::core::program::Program;
use crate::io::config::{StackflowConfig, SyncStrategy};
use crate::plan::RepoData;

/// Which branches a sync covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncScope {
    /// The current branch and its ancestors.
    #[default]
    Current,
    /// Every branch in the current branch's stack.
    Stack,
    /// Every local branch.
    All,
}

/// Builds sync programs. Propose reuses its prologue, branch segments and
/// epilogue.
pub struct SyncPlanner<'a> {
    config: &'a StackflowConfig,
    data: &'a RepoData,
}

impl<'a> SyncPlanner<'a> {
    pub fn new(config: &'a StackflowConfig, data: &'a RepoData) -> Self {
        Self { config, data }
    }

    pub fn plan(&self, scope: SyncScope) -> Result<Program> {
        let branches = self.branches_to_sync(scope)?;
        debug!(count = branches.len(), ?scope, "planning sync");
        let mut program = Program::new();
        self.prologue(&mut program);
        let mut last_checkout = None;
        for branch in &branches {
            if self.branch_segment(branch, &mut program) {
                last_checkout = Some(branch);
            }
        }
        self.epilogue(&mut program, last_checkout);
        Ok(optimize(program))
    }

    /// Local branches covered by `scope`, roots first and parents before children.
    pub fn branches_to_sync(&self, scope: SyncScope) -> Result<Vec<BranchName>> {
        let lineage = &self.config.lineage;
        let current = &self.data.current;
        if !self.data.branches.has_local(current) {
            bail!("current branch {current} does not exist locally");
        }
        let mut branches: Vec<BranchName> = match scope {
            SyncScope::Current => {
                let mut chain = self.rooted_ancestors(current);
                chain.push(current.clone());
                chain
            }
            SyncScope::Stack => {
                let base = self.stack_base(current);
                let mut stack = self.rooted_ancestors(&base);
                stack.push(base.clone());
                stack.extend(lineage.descendants(&base));
                stack
            }
            SyncScope::All => self.data.branches.local_branches(),
        };
        branches.retain(|branch| self.data.branches.has_local(branch));
        branches.sort_by_key(|branch| (self.sync_rank(branch), branch.clone()));
        branches.dedup();
        Ok(branches)
    }

    /// `Fetch` unless offline, and a stash of open changes.
    pub fn prologue(&self, program: &mut Program) {
        if !self.config.offline {
            program.add(Opcode::Fetch);
        }
        if self.data.has_open_changes {
            program.add(Opcode::StashOpenChanges);
        }
    }

    /// Return to the initial branch and restore stashed changes.
    pub fn epilogue(&self, program: &mut Program, last_checkout: Option<&BranchName>) {
        if last_checkout != Some(&self.data.current) {
            program.add(Opcode::Checkout {
                branch: self.data.current.clone(),
            });
        }
        if self.data.has_open_changes {
            program.add(Opcode::RestoreOpenChanges { conflicted: false });
        }
    }

    /// Append the opcodes that sync `branch`, ending with a branch marker.
    /// Returns false when there is nothing to do for the branch.
    pub fn branch_segment(&self, branch: &BranchName, program: &mut Program) -> bool {
        let kind = self.config.branch_type(branch);
        if kind == BranchType::Parked && *branch != self.data.current {
            debug!(branch = %branch, "skipping parked branch");
            return false;
        }
        let tracking = self
            .data
            .branches
            .has_tracking(branch)
            .then(|| branch.tracking(&self.config.remote));
        let online = !self.config.offline;

        let mut body = Vec::new();
        match kind {
            BranchType::Main
            | BranchType::Perennial
            | BranchType::Contribution
            | BranchType::Observed => {
                if let Some(tracking) = &tracking {
                    body.push(Opcode::Rebase {
                        branch: branch.clone(),
                        onto: tracking.clone(),
                    });
                    if online && kind.pushes() {
                        body.push(Opcode::PushCurrentBranch {
                            branch: branch.clone(),
                        });
                    }
                }
            }
            BranchType::Feature | BranchType::Parked | BranchType::Prototype => {
                let strategy = self.config.sync_feature_strategy;
                let parent = self
                    .effective_parent(branch)
                    .map(|(parent, _)| self.parent_ref(&parent));
                for source in tracking.iter().cloned().chain(parent) {
                    body.push(match strategy {
                        SyncStrategy::Merge => Opcode::Merge {
                            branch: branch.clone(),
                            source,
                        },
                        SyncStrategy::Rebase => Opcode::Rebase {
                            branch: branch.clone(),
                            onto: source,
                        },
                    });
                }
                if online && kind.pushes() {
                    if tracking.is_none() {
                        if self.config.push_new_branches {
                            body.push(Opcode::PushCurrentBranchIfLocal {
                                branch: branch.clone(),
                            });
                        }
                    } else if strategy == SyncStrategy::Rebase {
                        body.push(Opcode::ForcePushCurrentBranch {
                            branch: branch.clone(),
                        });
                    } else {
                        body.push(Opcode::PushCurrentBranch {
                            branch: branch.clone(),
                        });
                    }
                }
            }
        }

        let reparent = kind
            .syncs_with_parent()
            .then(|| self.effective_parent(branch))
            .flatten()
            .and_then(|(parent, configured)| match configured {
                Some(configured) if configured != parent => Some(Opcode::LineageParentSet {
                    branch: branch.clone(),
                    parent,
                }),
                _ => None,
            });
        if body.is_empty() && reparent.is_none() {
            return false;
        }
        if let Some(reparent) = reparent {
            program.add(reparent);
        }
        program.add(Opcode::Checkout {
            branch: branch.clone(),
        });
        program.add_all(body);
        program.add(Opcode::EndOfBranchProgram);
        true
    }

    /// Nearest ancestor that still exists, falling back to the main branch,
    /// together with the configured parent. `None` for root branches.
    pub fn effective_parent(
        &self,
        branch: &BranchName,
    ) -> Option<(BranchName, Option<BranchName>)> {
        if self.config.branch_type(branch).is_root() {
            return None;
        }
        let lineage = &self.config.lineage;
        let configured = lineage.parent(branch).cloned();
        let existing = lineage
            .ancestors(branch)
            .into_iter()
            .rev()
            .find(|ancestor| self.data.branches.contains(ancestor));
        let parent = existing.unwrap_or_else(|| self.config.main_branch.clone());
        Some((parent, configured))
    }

    fn parent_ref(&self, parent: &BranchName) -> String {
        if self.data.branches.has_local(parent) {
            parent.to_string()
        } else {
            parent.tracking(&self.config.remote)
        }
    }

    /// Ancestors outermost first. Chains that do not end at a root branch
    /// hang off the main branch.
    fn rooted_ancestors(&self, branch: &BranchName) -> Vec<BranchName> {
        let mut ancestors = self.config.lineage.ancestors(branch);
        let rooted = ancestors
            .first()
            .is_some_and(|top| self.config.branch_type(top).is_root());
        if !rooted && !self.config.branch_type(branch).is_root() {
            ancestors.insert(0, self.config.main_branch.clone());
        }
        ancestors
    }

    /// Topmost non-root branch above `branch`, or `branch` itself.
    fn stack_base(&self, branch: &BranchName) -> BranchName {
        self.config
            .lineage
            .ancestors(branch)
            .into_iter()
            .find(|ancestor| !self.config.branch_type(ancestor).is_root())
            .unwrap_or_else(|| branch.clone())
    }

    fn sync_rank(&self, branch: &BranchName) -> usize {
        if self.config.branch_type(branch).is_root() {
            0
        } else {
            1 + self.config.lineage.depth(branch)
        }
    }
}
