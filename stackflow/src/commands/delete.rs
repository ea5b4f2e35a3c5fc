use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument};

use crate::commands::open::prefetch;
use crate::commands::{
    CommandOutcome, RunOptions, ensure_no_workflow, execute_program, plan_with_restarts,
    settle_lineage,
};
use crate::core::branch::BranchName;
use crate::core::flow::ProgramFlow;
use crate::io::run_state::CommandKind;
use crate::plan::delete::plan_delete;

/// `stackflow delete <branch>`.
#[instrument(
    skip_all,
    fields(workdir = %workdir.display(), branch = %branch, dry_run = options.dry_run)
)]
pub fn delete(
    workdir: &Path,
    branch: &BranchName,
    options: &RunOptions,
) -> Result<CommandOutcome> {
    let planned = plan_with_restarts(workdir, |repo| {
        ensure_no_workflow(repo)?;
        let data = prefetch(&repo.git)?;
        let Some(config) = settle_lineage(repo, &data, options.dry_run)? else {
            return Ok(ProgramFlow::Restart);
        };
        let program = plan_delete(&config, &data, branch)?;
        Ok(ProgramFlow::Continue((data, program)))
    })?;
    let Some((repo, (data, program))) = planned else {
        return Ok(CommandOutcome::Done);
    };
    let outcome = execute_program(&repo, CommandKind::Delete, &data, program, options)?;
    info!(?outcome, "delete finished");
    Ok(outcome)
}
