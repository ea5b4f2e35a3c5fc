//! Running opcodes and deriving their inverses.

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::branch::BranchName;
use crate::core::opcode::Opcode;
use crate::core::program::Program;
use crate::io::backend::{RepoError, Repository};
use crate::io::forge::ProposalData;
use crate::vm::context::Context;

/// Failure of a single opcode.
#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("update config: {0:#}")]
    Config(anyhow::Error),

    #[error("forge: {0:#}")]
    Forge(anyhow::Error),
}

impl OpError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, OpError::Repo(err) if err.is_conflict())
    }
}

/// Result of running one opcode, as seen by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The user can fix the problem and continue.
    Recoverable { cause: String },
    Fatal { cause: String },
}

impl Opcode {
    /// Opcodes that undo this one, derived from the state before it runs.
    pub fn inverse(&self, ctx: &Context<'_>) -> Result<Program, OpError> {
        let repo = ctx.repo;
        let inverse = match self {
            Opcode::Checkout { branch } => match repo.current_branch() {
                Ok(current) if current != *branch => vec![Opcode::Checkout { branch: current }],
                Ok(_) => Vec::new(),
                Err(err) => return Err(err.into()),
            },
            Opcode::CreateBranch { branch, .. } => match repo.local_sha(branch)? {
                Some(_) => Vec::new(),
                None => vec![Opcode::DeleteLocalBranch {
                    branch: branch.clone(),
                }],
            },
            Opcode::DeleteLocalBranch { branch } => repo
                .local_sha(branch)?
                .map(|sha| Opcode::CreateBranch {
                    branch: branch.clone(),
                    start: sha,
                })
                .into_iter()
                .collect(),
            Opcode::ResetBranchToSha { branch, .. }
            | Opcode::Merge { branch, .. }
            | Opcode::Rebase { branch, .. } => repo
                .local_sha(branch)?
                .map(|sha| Opcode::ResetBranchToSha {
                    branch: branch.clone(),
                    sha,
                })
                .into_iter()
                .collect(),
            Opcode::PushCurrentBranch { branch }
            | Opcode::ForcePushCurrentBranch { branch }
            | Opcode::ResetRemoteBranchToSha { branch, .. } => {
                vec![restore_remote(repo, branch)?]
            }
            Opcode::PushCurrentBranchIfLocal { branch } => match repo.remote_sha(branch)? {
                Some(_) => Vec::new(),
                None => vec![Opcode::DeleteTrackingBranch {
                    branch: branch.clone(),
                }],
            },
            Opcode::DeleteTrackingBranch { branch } => repo
                .remote_sha(branch)?
                .map(|sha| Opcode::ResetRemoteBranchToSha {
                    branch: branch.clone(),
                    sha,
                })
                .into_iter()
                .collect(),
            Opcode::StashOpenChanges => {
                if repo.has_open_changes()? {
                    vec![Opcode::RestoreOpenChanges { conflicted: false }]
                } else {
                    Vec::new()
                }
            }
            Opcode::RestoreOpenChanges { .. } => {
                if repo.stash_size()?.0 > 0 {
                    vec![Opcode::StashOpenChanges]
                } else {
                    Vec::new()
                }
            }
            Opcode::LineageParentSet { branch, .. } => {
                let lineage = ctx.config.snapshot().map_err(OpError::Config)?.lineage;
                match lineage.parent(branch) {
                    Some(old) => vec![Opcode::LineageParentSet {
                        branch: branch.clone(),
                        parent: old.clone(),
                    }],
                    None => vec![Opcode::LineageParentRemove {
                        branch: branch.clone(),
                    }],
                }
            }
            Opcode::LineageParentRemove { branch } => {
                let lineage = ctx.config.snapshot().map_err(OpError::Config)?.lineage;
                lineage
                    .parent(branch)
                    .map(|old| Opcode::LineageParentSet {
                        branch: branch.clone(),
                        parent: old.clone(),
                    })
                    .into_iter()
                    .collect()
            }
            Opcode::Fetch
            | Opcode::ProposalCreate { .. }
            | Opcode::BrowserOpen { .. }
            | Opcode::EndOfBranchProgram => Vec::new(),
        };
        Ok(Program::from(inverse))
    }

    /// Execute against `ctx` and classify any failure.
    pub fn run(&self, ctx: &Context<'_>) -> Outcome {
        debug!(opcode = %self, "running opcode");
        match self.execute(ctx) {
            Ok(()) => Outcome::Success,
            Err(err) if err.is_conflict() && self.is_recoverable() => Outcome::Recoverable {
                cause: err.to_string(),
            },
            Err(err) => Outcome::Fatal {
                cause: err.to_string(),
            },
        }
    }

    fn execute(&self, ctx: &Context<'_>) -> Result<(), OpError> {
        let repo = ctx.repo;
        match self {
            Opcode::Fetch => repo.fetch()?,
            Opcode::Checkout { branch } => {
                if repo.current_branch().ok().as_ref() != Some(branch) {
                    repo.checkout(branch)?;
                }
            }
            Opcode::CreateBranch { branch, start } => match repo.local_sha(branch)? {
                Some(existing) if existing == *start => {}
                Some(existing) => {
                    return Err(RepoError::failed(
                        format!("create branch {branch}"),
                        format!("branch already exists at {existing}"),
                    )
                    .into());
                }
                None => repo.create_branch(branch, start)?,
            },
            Opcode::DeleteLocalBranch { branch } => {
                if repo.local_sha(branch)?.is_some() {
                    repo.delete_local_branch(branch)?;
                }
            }
            Opcode::ResetBranchToSha { branch, sha } => repo.reset_branch(branch, sha)?,
            Opcode::Merge { source, .. } => {
                if repo.merge_in_progress()? {
                    ensure_resolved(repo, "merge")?;
                    repo.commit_merge()?;
                } else {
                    repo.merge(source)?;
                }
            }
            Opcode::Rebase { onto, .. } => {
                if repo.rebase_in_progress()? {
                    ensure_resolved(repo, "rebase")?;
                    repo.continue_rebase()?;
                } else {
                    repo.rebase(onto)?;
                }
            }
            Opcode::PushCurrentBranch { branch } => repo.push(branch, false)?,
            Opcode::ForcePushCurrentBranch { branch } => repo.push(branch, true)?,
            Opcode::PushCurrentBranchIfLocal { branch } => {
                if repo.remote_sha(branch)?.is_none() {
                    repo.push(branch, false)?;
                }
            }
            Opcode::ResetRemoteBranchToSha { branch, sha } => repo.push_sha(branch, sha)?,
            Opcode::DeleteTrackingBranch { branch } => {
                if repo.remote_sha(branch)?.is_some() {
                    repo.delete_remote_branch(branch)?;
                }
            }
            Opcode::StashOpenChanges => {
                if repo.has_open_changes()? {
                    repo.stash()?;
                }
            }
            Opcode::RestoreOpenChanges { conflicted } => {
                ensure_resolved(repo, "stash pop")?;
                if repo.stash_size()?.0 == 0 {
                    return Ok(());
                }
                if *conflicted {
                    repo.stash_drop()?;
                } else {
                    repo.stash_pop()?;
                }
            }
            Opcode::LineageParentSet { branch, parent } => ctx
                .config
                .set_parent(branch, parent)
                .map_err(OpError::Config)?,
            Opcode::LineageParentRemove { branch } => ctx
                .config
                .remove_parent(branch)
                .map_err(OpError::Config)?,
            Opcode::ProposalCreate {
                branch,
                parent,
                title,
                body,
            } => {
                let forge = ctx.forge.ok_or_else(|| {
                    OpError::Forge(anyhow!(
                        "cannot create a proposal for {branch}: the remote is not on a known forge (set `forge` in the config)"
                    ))
                })?;
                let url = forge
                    .create_proposal(&ProposalData {
                        branch: branch.clone(),
                        target: parent.clone(),
                        title: title.clone(),
                        body: body.clone(),
                    })
                    .map_err(OpError::Forge)?;
                open_in_browser(ctx, &url);
            }
            Opcode::BrowserOpen { url } => open_in_browser(ctx, url),
            Opcode::EndOfBranchProgram => {}
        }
        Ok(())
    }
}

fn restore_remote(repo: &dyn Repository, branch: &BranchName) -> Result<Opcode, OpError> {
    Ok(match repo.remote_sha(branch)? {
        Some(sha) => Opcode::ResetRemoteBranchToSha {
            branch: branch.clone(),
            sha,
        },
        None => Opcode::DeleteTrackingBranch {
            branch: branch.clone(),
        },
    })
}

fn ensure_resolved(repo: &dyn Repository, operation: &str) -> Result<(), OpError> {
    if repo.has_unresolved_conflicts()? {
        return Err(RepoError::conflict(operation, "unresolved conflicts remain").into());
    }
    Ok(())
}

/// Opening a browser never fails a workflow.
fn open_in_browser(ctx: &Context<'_>, url: &str) {
    if let Err(err) = ctx.browser.open(url) {
        warn!(error = %err, url, "could not open browser");
        println!("Open this URL in your browser: {url}");
    }
}
