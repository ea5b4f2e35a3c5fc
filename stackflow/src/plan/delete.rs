//! Planning `stackflow delete <branch>`.

use anyhow::{Result, bail};

use crate::core::branch::BranchName;
use crate::core::opcode::Opcode;
use crate::core::optimizer::optimize;
use crate::core::program::Program;
use crate::io::config::StackflowConfig;
use crate::plan::RepoData;

/// Delete `branch` locally and remotely and hand its children to its parent.
pub fn plan_delete(
    config: &StackflowConfig,
    data: &RepoData,
    branch: &BranchName,
) -> Result<Program> {
    let kind = config.branch_type(branch);
    if kind.is_root() {
        bail!("cannot delete {branch}: it is a {kind} branch");
    }
    let Some(info) = data.branches.find(branch) else {
        bail!("there is no branch named {branch}");
    };
    let lineage = &config.lineage;
    let parent = lineage
        .ancestors(branch)
        .into_iter()
        .rev()
        .find(|ancestor| data.branches.has_local(ancestor))
        .unwrap_or_else(|| config.main_branch.clone());
    let is_current = data.current == *branch;
    let stash = is_current && data.has_open_changes;

    let mut program = Program::new();
    if stash {
        program.add(Opcode::StashOpenChanges);
    }
    if is_current {
        program.add(Opcode::Checkout {
            branch: parent.clone(),
        });
    }
    if info.has_tracking_branch() && !config.offline {
        program.add(Opcode::DeleteTrackingBranch {
            branch: branch.clone(),
        });
    }
    if info.is_local() {
        program.add(Opcode::DeleteLocalBranch {
            branch: branch.clone(),
        });
    }
    for child in lineage.children(branch) {
        program.add(Opcode::LineageParentSet {
            branch: child,
            parent: parent.clone(),
        });
    }
    if lineage.parent(branch).is_some() {
        program.add(Opcode::LineageParentRemove {
            branch: branch.clone(),
        });
    }
    if stash {
        program.add(Opcode::RestoreOpenChanges { conflicted: false });
    }
    Ok(optimize(program))
}
