//! Planning `stackflow propose`.
//!
//! Proposing syncs the affected branches first, makes sure each one is on the
//! remote, and then either opens the existing proposal or creates a new one.

use anyhow::{Result, bail};
use tracing::debug;

use crate::core::branch::{BranchName, BranchType};
use crate::core::opcode::Opcode;
use crate::core::optimizer::optimize;
use crate::core::program::Program;
use crate::io::config::StackflowConfig;
use crate::plan::RepoData;
use crate::plan::sync::{SyncPlanner, SyncScope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchToPropose {
    pub name: BranchName,
    pub branch_type: BranchType,
    pub parent: BranchName,
    /// URL of an open proposal found during prefetch.
    pub existing_proposal_url: Option<String>,
}

/// Branches a propose over `scope` would consider, without proposal lookups.
/// Root branches are never candidates.
pub fn candidates(
    config: &StackflowConfig,
    data: &RepoData,
    scope: SyncScope,
) -> Result<Vec<BranchToPropose>> {
    let planner = SyncPlanner::new(config, data);
    let names = match scope {
        SyncScope::Current => vec![data.current.clone()],
        SyncScope::Stack | SyncScope::All => planner.branches_to_sync(scope)?,
    };
    Ok(names
        .into_iter()
        .filter_map(|name| {
            let (parent, _) = planner.effective_parent(&name)?;
            Some(BranchToPropose {
                branch_type: config.branch_type(&name),
                parent,
                existing_proposal_url: None,
                name,
            })
        })
        .collect())
}

pub struct ProposeRequest<'a> {
    pub scope: SyncScope,
    pub branches: &'a [BranchToPropose],
    pub title: Option<&'a str>,
    pub body: Option<&'a str>,
}

pub fn plan_propose(
    config: &StackflowConfig,
    data: &RepoData,
    request: &ProposeRequest<'_>,
) -> Result<Program> {
    if config.offline {
        bail!("cannot propose while offline (offline = true in the config)");
    }
    if !request
        .branches
        .iter()
        .any(|branch| branch.branch_type.is_proposable())
    {
        bail!(
            "no branch to propose: {} is a {} branch",
            data.current,
            config.branch_type(&data.current)
        );
    }
    let sync = SyncPlanner::new(config, data);
    let mut program = Program::new();
    sync.prologue(&mut program);
    let mut last_checkout = None;
    let to_sync = sync.branches_to_sync(request.scope)?;
    for branch in &to_sync {
        if sync.branch_segment(branch, &mut program) {
            last_checkout = Some(branch);
        }
    }
    for branch in request.branches {
        if !branch.branch_type.is_proposable() {
            debug!(branch = %branch.name, kind = %branch.branch_type, "not proposing");
            continue;
        }
        program.add(Opcode::PushCurrentBranchIfLocal {
            branch: branch.name.clone(),
        });
        match &branch.existing_proposal_url {
            Some(url) => program.add(Opcode::BrowserOpen { url: url.clone() }),
            None => program.add(Opcode::ProposalCreate {
                branch: branch.name.clone(),
                parent: branch.parent.clone(),
                title: request.title.map(str::to_string),
                body: request.body.map(str::to_string),
            }),
        }
    }
    sync.epilogue(&mut program, last_checkout);
    Ok(optimize(program))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::{BranchInfo, BranchesSnapshot, StashSize};

    fn data(current: &str, names: &[&str]) -> RepoData {
        RepoData {
            current: current.into(),
            branches: BranchesSnapshot {
                active: Some(current.into()),
                branches: names
                    .iter()
                    .map(|name| BranchInfo {
                        name: (*name).into(),
                        local_sha: Some("1".into()),
                        remote_sha: None,
                    })
                    .collect(),
            },
            stash_size: StashSize(0),
            has_open_changes: false,
        }
    }

    #[test]
    fn candidates_for_current_scope_is_the_current_branch() {
        let mut config = StackflowConfig::default();
        config.lineage.set_parent("a".into(), "main".into());
        config.lineage.set_parent("b".into(), "a".into());
        let data = data("b", &["a", "b", "main"]);
        let found = candidates(&config, &data, SyncScope::Current).expect("candidates");
        assert_eq!(
            found,
            vec![BranchToPropose {
                name: "b".into(),
                branch_type: BranchType::Feature,
                parent: "a".into(),
                existing_proposal_url: None,
            }]
        );
        let stack = candidates(&config, &data, SyncScope::Stack).expect("candidates");
        let names: Vec<&str> = stack.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn proposing_is_refused_offline() {
        let config = StackflowConfig {
            offline: true,
            ..StackflowConfig::default()
        };
        let data = data("a", &["a", "main"]);
        let branches = candidates(&config, &data, SyncScope::Current).expect("candidates");
        let request = ProposeRequest {
            scope: SyncScope::Current,
            branches: &branches,
            title: None,
            body: None,
        };
        assert!(plan_propose(&config, &data, &request).is_err());
    }
}
