//! Orchestration for CLI commands.
//!
//! Commands open the repository, gather read-only data, plan, and hand the
//! program to the interpreter. They print user-facing progress to stdout;
//! diagnostics go through `tracing`.

pub mod delete;
pub mod open;
pub mod propose;
pub mod resume;
pub mod set_parent;
pub mod sync;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::core::flow::{MAX_RESTARTS, ProgramFlow};
use crate::core::program::Program;
use crate::exit_codes;
use crate::io::browser::SystemBrowser;
use crate::io::config::{StackflowConfig, write_config};
use crate::io::forge::Forge;
use crate::io::lock::RepoLock;
use crate::io::run_state::{CommandKind, RunState};
use crate::plan::RepoData;
use crate::vm::context::Context;
use crate::vm::dry_run::{
    DryRunBrowser, DryRunConfigStore, DryRunForge, DryRunLog, DryRunRepository,
};
use crate::vm::interpreter::{Finish, Interpreter};

use self::open::{OpenRepo, open_repo};

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Done,
    /// Waiting for the user to resolve something and continue.
    Suspended { cause: String },
    Aborted { cause: String },
}

impl CommandOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandOutcome::Done => exit_codes::OK,
            CommandOutcome::Suspended { .. } => exit_codes::SUSPENDED,
            CommandOutcome::Aborted { .. } => exit_codes::FAILED,
        }
    }
}

impl From<Finish> for CommandOutcome {
    fn from(finish: Finish) -> Self {
        match finish {
            Finish::Completed => CommandOutcome::Done,
            Finish::Suspended { cause } => CommandOutcome::Suspended { cause },
            Finish::Aborted { cause } => CommandOutcome::Aborted { cause },
        }
    }
}

/// Options shared by the commands that execute programs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Set by the signal handler; checked between opcodes.
    pub interrupt: Option<Arc<AtomicBool>>,
}

/// Run the gather phase until it settles. `None` means there is nothing to do.
pub(crate) fn plan_with_restarts<T>(
    workdir: &Path,
    mut gather: impl FnMut(&OpenRepo) -> Result<ProgramFlow<T>>,
) -> Result<Option<(OpenRepo, T)>> {
    for attempt in 0..=MAX_RESTARTS {
        let repo = open_repo(workdir)?;
        match gather(&repo)? {
            ProgramFlow::Continue(value) => return Ok(Some((repo, value))),
            ProgramFlow::Exit => return Ok(None),
            ProgramFlow::Restart => debug!(attempt, "restarting plan phase"),
        }
    }
    bail!("configuration kept changing while planning (gave up after {MAX_RESTARTS} restarts)")
}

/// Refuse to plan while another workflow is in progress.
pub(crate) fn ensure_no_workflow(repo: &OpenRepo) -> Result<()> {
    if let Some(state) = repo.store.load()? {
        bail!(
            "a {} workflow is already in progress ({}); run `stackflow continue`, `stackflow skip` or `stackflow undo` first",
            state.command,
            state.status
        );
    }
    Ok(())
}

/// `config` without the lineage entries of branches that no longer exist
/// anywhere and have no children left. Entries that still have children
/// stay; syncing re-parents those children through the program so it can be
/// undone. `None` when nothing is stale.
pub(crate) fn pruned_lineage(config: &StackflowConfig, data: &RepoData) -> Option<StackflowConfig> {
    let mut config = config.clone();
    let mut changed = false;
    loop {
        let stale: Vec<_> = config
            .lineage
            .entries()
            .map(|(child, _)| child.clone())
            .filter(|child| {
                !data.branches.contains(child) && config.lineage.children(child).is_empty()
            })
            .collect();
        if stale.is_empty() {
            break;
        }
        for branch in &stale {
            debug!(branch = %branch, "lineage entry is stale");
            config.lineage.remove(branch);
        }
        changed = true;
    }
    changed.then_some(config)
}

/// The configuration to plan against. Stale lineage is written back and
/// `None` is returned so the plan phase restarts from disk. A dry run plans
/// against the pruned configuration without writing it.
pub(crate) fn settle_lineage(
    repo: &OpenRepo,
    data: &RepoData,
    dry_run: bool,
) -> Result<Option<StackflowConfig>> {
    match pruned_lineage(&repo.config, data) {
        None => Ok(Some(repo.config.clone())),
        Some(pruned) if dry_run => Ok(Some(pruned)),
        Some(pruned) => {
            info!("removing lineage of deleted branches");
            write_config(&repo.paths.config_path, &pruned)?;
            Ok(None)
        }
    }
}

/// Start `program` as a new workflow and report how it ended.
pub(crate) fn execute_program(
    repo: &OpenRepo,
    command: CommandKind,
    data: &RepoData,
    program: Program,
    options: &RunOptions,
) -> Result<CommandOutcome> {
    if program.is_empty() {
        println!("Nothing to do.");
        return Ok(CommandOutcome::Done);
    }
    let state = RunState::new(
        command,
        options.dry_run,
        data.current.clone(),
        data.branches.clone(),
        repo.config.snapshot(),
        data.stash_size,
        program,
    );
    if options.dry_run {
        return dry_run(repo, state);
    }

    let _lock = RepoLock::acquire(&repo.paths.lock_path)?;
    let browser = SystemBrowser;
    let interpreter = interpreter(repo, repo.context(&browser), options);
    let (finish, state) = interpreter.start(state)?;
    report(&finish, &state);
    Ok(finish.into())
}

pub(crate) fn interpreter<'a>(
    repo: &'a OpenRepo,
    ctx: Context<'a>,
    options: &RunOptions,
) -> Interpreter<'a> {
    let interpreter = Interpreter::new(ctx, &repo.store);
    match &options.interrupt {
        Some(flag) => interpreter.with_interrupt(Arc::clone(flag)),
        None => interpreter,
    }
}

fn dry_run(repo: &OpenRepo, state: RunState) -> Result<CommandOutcome> {
    println!("Plan for {}:", state.command);
    print!("{}", state.run_program);

    let log = DryRunLog::new();
    let dry_repo = DryRunRepository::new(&repo.git, &log);
    let dry_config = DryRunConfigStore::new(&repo.config_store, &log)?;
    let dry_forge = repo.forge.as_deref().map(|forge| DryRunForge::new(forge, &log));
    let dry_browser = DryRunBrowser::new(&log);
    let ctx = Context {
        repo: &dry_repo,
        config: &dry_config,
        forge: dry_forge.as_ref().map(|forge| forge as &dyn Forge),
        browser: &dry_browser,
    };
    let (finish, _) = Interpreter::new(ctx, &repo.store).start(state)?;

    println!("Dry run, nothing was changed. Would run:");
    for line in log.lines() {
        println!("  {line}");
    }
    Ok(finish.into())
}

/// Tell the user how the workflow ended and what they can do next.
pub(crate) fn report(finish: &Finish, state: &RunState) {
    match finish {
        Finish::Completed => println!("{} completed.", state.command),
        Finish::Suspended { cause } => {
            println!("{} stopped: {cause}", state.command);
            if let Some(opcode) = state.run_program.first() {
                println!("Stopped at: {opcode}");
            }
            println!("To continue after resolving the problem, run `stackflow continue`.");
            if state.can_skip() {
                println!("To skip this branch, run `stackflow skip`.");
            }
            println!("To go back to where you started, run `stackflow undo`.");
        }
        Finish::Aborted { cause } => {
            println!("{} failed: {cause}", state.command);
            println!("To go back to where you started, run `stackflow undo`.");
            println!("To retry after fixing the problem, run `stackflow continue`.");
        }
    }
}
