use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::commands::open::prefetch;
use crate::commands::{
    CommandOutcome, RunOptions, ensure_no_workflow, execute_program, plan_with_restarts,
    settle_lineage,
};
use crate::core::flow::ProgramFlow;
use crate::io::run_state::CommandKind;
use crate::plan::sync::{SyncPlanner, SyncScope};

/// `stackflow sync`: bring branches up to date with their parents and remotes.
#[instrument(skip_all, fields(workdir = %workdir.display(), ?scope, dry_run = options.dry_run))]
pub fn sync(workdir: &Path, scope: SyncScope, options: &RunOptions) -> Result<CommandOutcome> {
    let planned = plan_with_restarts(workdir, |repo| {
        ensure_no_workflow(repo)?;
        let data = prefetch(&repo.git)?;
        let Some(config) = settle_lineage(repo, &data, options.dry_run)? else {
            return Ok(ProgramFlow::Restart);
        };
        let program = SyncPlanner::new(&config, &data).plan(scope)?;
        debug!(opcodes = program.len(), "sync planned");
        Ok(ProgramFlow::Continue((data, program)))
    })?;
    let Some((repo, (data, program))) = planned else {
        return Ok(CommandOutcome::Done);
    };
    let outcome = execute_program(&repo, CommandKind::Sync, &data, program, options)?;
    info!(?outcome, "sync finished");
    Ok(outcome)
}
