use std::path::Path;

use anyhow::{Result, bail};
use tracing::{debug, info, instrument};

use crate::commands::open::{lookup_proposals, prefetch};
use crate::commands::{
    CommandOutcome, RunOptions, ensure_no_workflow, execute_program, plan_with_restarts,
    settle_lineage,
};
use crate::core::flow::ProgramFlow;
use crate::io::run_state::CommandKind;
use crate::plan::propose::{ProposeRequest, candidates, plan_propose};
use crate::plan::sync::SyncScope;

#[derive(Debug, Clone, Default)]
pub struct ProposeArgs {
    pub scope: SyncScope,
    pub title: Option<String>,
    pub body: Option<String>,
}

/// `stackflow propose`: sync, push, and open or create proposals.
#[instrument(
    skip_all,
    fields(workdir = %workdir.display(), scope = ?args.scope, dry_run = options.dry_run)
)]
pub fn propose(
    workdir: &Path,
    args: &ProposeArgs,
    options: &RunOptions,
) -> Result<CommandOutcome> {
    let planned = plan_with_restarts(workdir, |repo| {
        ensure_no_workflow(repo)?;
        let data = prefetch(&repo.git)?;
        let Some(config) = settle_lineage(repo, &data, options.dry_run)? else {
            return Ok(ProgramFlow::Restart);
        };
        let mut branches = candidates(&config, &data, args.scope)?;
        if branches.iter().any(|branch| branch.branch_type.is_proposable()) {
            let Some(forge) = repo.forge.as_deref() else {
                bail!(
                    "cannot propose: remote {} is not on a known forge; set `forge` in {}",
                    repo.config.remote,
                    repo.paths.config_path.display()
                );
            };
            lookup_proposals(forge, &mut branches)?;
        }
        let request = ProposeRequest {
            scope: args.scope,
            branches: &branches,
            title: args.title.as_deref(),
            body: args.body.as_deref(),
        };
        let program = plan_propose(&config, &data, &request)?;
        debug!(opcodes = program.len(), "propose planned");
        Ok(ProgramFlow::Continue((data, program)))
    })?;
    let Some((repo, (data, program))) = planned else {
        return Ok(CommandOutcome::Done);
    };
    let outcome = execute_program(&repo, CommandKind::Propose, &data, program, options)?;
    info!(?outcome, "propose finished");
    Ok(outcome)
}
