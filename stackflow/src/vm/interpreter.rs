//! The workflow state machine.
//!
//! The interpreter runs a run-state's remaining program one opcode at a time,
//! accumulates inverses into the undo program, and persists the run-state
//! after every transition so the process can exit at any point and a later
//! `continue`, `skip` or `undo` picks up where it stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::io::run_state::{RunState, RunStateStore, RunStatus};
use crate::vm::context::Context;
use crate::vm::exec::Outcome;

pub const INTERRUPTED: &str = "interrupted by user";

/// How a call into the interpreter ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish {
    Completed,
    /// Waiting for the user; the run-state is persisted.
    Suspended { cause: String },
    /// Stopped on a fatal failure; the run-state is persisted with its undo program.
    Aborted { cause: String },
}

pub struct Interpreter<'a> {
    ctx: Context<'a>,
    store: &'a RunStateStore,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: Context<'a>, store: &'a RunStateStore) -> Self {
        Self {
            ctx,
            store,
            interrupt: None,
        }
    }

    /// Stop at the next opcode boundary once `flag` is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Begin a new workflow. Fails without touching the repository when
    /// another workflow is in progress.
    #[instrument(skip_all, fields(command = %state.command, opcodes = state.run_program.len()))]
    pub fn start(&self, state: RunState) -> Result<(Finish, RunState)> {
        if !state.dry_run {
            self.store.create(&state)?;
        }
        self.execute(state)
    }

    /// Re-run the opcode the workflow stopped on, then the rest of the program.
    #[instrument(skip_all, fields(command = %state.command, status = %state.status))]
    pub fn resume(&self, mut state: RunState) -> Result<(Finish, RunState)> {
        match state.status {
            RunStatus::Undoing => {
                bail!("an undo stopped part-way; run `stackflow undo` again to finish it")
            }
            RunStatus::Completed => bail!("the workflow already completed"),
            RunStatus::Running | RunStatus::Suspended | RunStatus::Aborted => {}
        }
        if self.ctx.repo.has_unresolved_conflicts()? {
            bail!("you must resolve the conflicts before continuing");
        }
        state.status = RunStatus::Running;
        state.failure = None;
        self.execute(state)
    }

    /// Abandon the conflicting merge or rebase, drop the rest of the current
    /// branch's opcodes and keep going with the next branch.
    #[instrument(skip_all, fields(command = %state.command))]
    pub fn skip(&self, mut state: RunState) -> Result<(Finish, RunState)> {
        if !state.can_skip() {
            bail!("skip is only possible while stopped on a merge or rebase conflict");
        }
        self.abort_in_progress()?;
        state.run_program = state.run_program.without_current_branch();
        state.status = RunStatus::Running;
        state.failure = None;
        debug!(remaining = state.run_program.len(), "skipped current branch");
        self.execute(state)
    }

    /// Run the undo program, latest inverse first. The optimizer is not
    /// applied and no new inverses are recorded.
    #[instrument(
        skip_all,
        fields(command = %state.command, opcodes = state.undo_api_program.len())
    )]
    pub fn undo(&self, mut state: RunState) -> Result<(Finish, RunState)> {
        self.abort_in_progress()?;
        state.status = RunStatus::Undoing;
        state.failure = None;
        self.persist(&state)?;
        while let Some(opcode) = state.undo_api_program.first().cloned() {
            match opcode.run(&self.ctx) {
                Outcome::Success => {
                    state.undo_api_program = state.undo_api_program.tail(1);
                    self.persist(&state)?;
                }
                Outcome::Recoverable { cause } | Outcome::Fatal { cause } => {
                    warn!(opcode = %opcode, cause = %cause, "undo stopped");
                    state.failure = Some(cause.clone());
                    self.persist(&state)?;
                    return Ok((Finish::Aborted { cause }, state));
                }
            }
        }
        self.finish(&mut state)?;
        info!("undo completed");
        Ok((Finish::Completed, state))
    }

    fn execute(&self, mut state: RunState) -> Result<(Finish, RunState)> {
        self.persist(&state)?;
        while let Some(opcode) = state.run_program.first().cloned() {
            if self.interrupted() {
                return self.stop(state, RunStatus::Suspended, INTERRUPTED.to_string());
            }
            let inverse = match opcode.inverse(&self.ctx) {
                Ok(inverse) => inverse,
                Err(err) => {
                    let cause = format!("cannot prepare undo for `{opcode}`: {err}");
                    return self.stop(state, RunStatus::Aborted, cause);
                }
            };
            match opcode.run(&self.ctx) {
                Outcome::Success => {
                    state.undo_api_program.prepend_all(inverse);
                    state.run_program = state.run_program.tail(1);
                    self.persist(&state)?;
                }
                Outcome::Recoverable { cause } => {
                    state.run_program = state.run_program.with_first(opcode.after_conflict());
                    return self.stop(state, RunStatus::Suspended, cause);
                }
                Outcome::Fatal { cause } => {
                    return self.stop(state, RunStatus::Aborted, cause);
                }
            }
        }
        self.finish(&mut state)?;
        info!(command = %state.command, "workflow completed");
        Ok((Finish::Completed, state))
    }

    fn stop(
        &self,
        mut state: RunState,
        status: RunStatus,
        cause: String,
    ) -> Result<(Finish, RunState)> {
        warn!(
            status = %status,
            cause = %cause,
            remaining = state.run_program.len(),
            "workflow stopped"
        );
        state.status = status;
        state.failure = Some(cause.clone());
        self.persist(&state)?;
        let finish = match status {
            RunStatus::Aborted => Finish::Aborted { cause },
            _ => Finish::Suspended { cause },
        };
        Ok((finish, state))
    }

    fn finish(&self, state: &mut RunState) -> Result<()> {
        state.end_branches_snapshot = Some(self.ctx.repo.branches_snapshot()?);
        state.end_config_snapshot = Some(self.ctx.config.snapshot()?);
        state.end_stash_size = Some(self.ctx.repo.stash_size()?);
        state.status = RunStatus::Completed;
        state.failure = None;
        if !state.dry_run {
            self.store.delete()?;
        }
        Ok(())
    }

    fn abort_in_progress(&self) -> Result<()> {
        let repo = self.ctx.repo;
        if repo.merge_in_progress()? {
            debug!("aborting merge in progress");
            repo.abort_merge()?;
        }
        if repo.rebase_in_progress()? {
            debug!("aborting rebase in progress");
            repo.abort_rebase()?;
        }
        Ok(())
    }

    fn persist(&self, state: &RunState) -> Result<()> {
        if state.dry_run {
            return Ok(());
        }
        self.store.save(state)
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}
