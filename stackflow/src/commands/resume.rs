//! Commands that act on a stopped workflow: continue, skip, undo and status.

use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::{info, instrument};

use crate::commands::open::{OpenRepo, open_repo};
use crate::commands::{CommandOutcome, RunOptions, interpreter, report};
use crate::io::browser::SystemBrowser;
use crate::io::lock::RepoLock;
use crate::io::run_state::RunState;
use crate::vm::interpreter::{Finish, Interpreter};

fn load_stopped(repo: &OpenRepo, verb: &str) -> Result<RunState> {
    repo.store
        .load()?
        .ok_or_else(|| anyhow!("nothing to {verb}: no workflow is in progress"))
}

/// Shared shape of continue/skip/undo: lock, load, hand to the interpreter.
fn with_stopped(
    workdir: &Path,
    verb: &str,
    options: &RunOptions,
    run: impl FnOnce(&Interpreter<'_>, RunState) -> Result<(Finish, RunState)>,
) -> Result<(Finish, RunState)> {
    let repo = open_repo(workdir)?;
    let _lock = RepoLock::acquire(&repo.paths.lock_path)?;
    let state = load_stopped(&repo, verb)?;
    let browser = SystemBrowser;
    let interpreter = interpreter(&repo, repo.context(&browser), options);
    run(&interpreter, state)
}

/// `stackflow continue`: re-run the opcode the workflow stopped on.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn continue_run(workdir: &Path, options: &RunOptions) -> Result<CommandOutcome> {
    let (finish, state) = with_stopped(workdir, "continue", options, |interpreter, state| {
        interpreter.resume(state)
    })?;
    report(&finish, &state);
    Ok(finish.into())
}

/// `stackflow skip`: abandon the conflicting branch and go on with the next.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn skip(workdir: &Path, options: &RunOptions) -> Result<CommandOutcome> {
    let (finish, state) = with_stopped(workdir, "skip", options, |interpreter, state| {
        interpreter.skip(state)
    })?;
    report(&finish, &state);
    Ok(finish.into())
}

/// `stackflow undo`: revert everything the stopped workflow did.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn undo(workdir: &Path) -> Result<CommandOutcome> {
    let (finish, state) =
        with_stopped(workdir, "undo", &RunOptions::default(), |interpreter, state| {
            interpreter.undo(state)
        })?;
    match &finish {
        Finish::Completed => {
            info!(command = %state.command, "undo finished");
            println!("Undid {}.", state.command);
        }
        Finish::Suspended { cause } | Finish::Aborted { cause } => {
            println!("Undo of {} stopped: {cause}", state.command);
            println!("Fix the problem and run `stackflow undo` again.");
        }
    }
    Ok(finish.into())
}

/// `stackflow status`: describe the workflow in progress, if any.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn status(workdir: &Path) -> Result<CommandOutcome> {
    let repo = open_repo(workdir)?;
    match repo.store.load()? {
        None => println!("No workflow in progress."),
        Some(state) => print!("{}", describe(&state)),
    }
    Ok(CommandOutcome::Done)
}

/// Human-readable summary of a persisted run-state.
pub fn describe(state: &RunState) -> String {
    let mut out = format!("{} workflow is {}", state.command, state.status);
    out.push_str(&format!(" (started on {})\n", state.initial_branch));
    if let Some(cause) = &state.failure {
        out.push_str(&format!("Problem: {cause}\n"));
    }
    if let Some(opcode) = state.failing_opcode() {
        out.push_str(&format!("Stopped at: {opcode}\n"));
    }
    out.push_str(&format!(
        "{} step(s) remaining, {} step(s) to undo\n",
        state.run_program.len(),
        state.undo_api_program.len()
    ));
    if !state.touched_branches.is_empty() {
        let names: Vec<&str> = state.touched_branches.iter().map(|b| b.as_str()).collect();
        out.push_str(&format!("Branches: {}\n", names.join(", ")));
    }
    out
}
