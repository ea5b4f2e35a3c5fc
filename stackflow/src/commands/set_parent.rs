use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::commands::CommandOutcome;
use crate::commands::open::{open_repo, prefetch};
use crate::core::branch::BranchName;
use crate::io::config::ConfigStore;

/// `stackflow set-parent <branch> <parent>`: record lineage directly.
///
/// This is a plain config edit outside any workflow, so it is not undoable.
#[instrument(skip_all, fields(workdir = %workdir.display(), branch = %branch, parent = %parent))]
pub fn set_parent(
    workdir: &Path,
    branch: &BranchName,
    parent: &BranchName,
) -> Result<CommandOutcome> {
    let repo = open_repo(workdir)?;
    let kind = repo.config.branch_type(branch);
    if kind.is_root() {
        bail!("{branch} is a {kind} branch and cannot have a parent");
    }
    if branch == parent {
        bail!("{branch} cannot be its own parent");
    }
    let data = prefetch(&repo.git)?;
    for name in [branch, parent] {
        if !data.branches.contains(name) {
            bail!("there is no branch named {name}");
        }
    }
    if repo.config.lineage.descendants(branch).contains(parent) {
        bail!("{parent} is a descendant of {branch}; that would create a cycle");
    }
    repo.config_store.set_parent(branch, parent)?;
    info!("parent updated");
    println!("{branch} now has parent {parent}.");
    Ok(CommandOutcome::Done)
}
