//! Durable record of the in-flight workflow (`<git-dir>/stackflow/runstate.json`).

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::branch::BranchName;
use crate::core::opcode::Opcode;
use crate::core::program::Program;
use crate::core::snapshot::{BranchesSnapshot, ConfigSnapshot, StashSize};

pub const RUN_STATE_VERSION: u32 = 1;

const RUN_STATE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/run_state.v1.schema.json"
));

/// Command that started the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Sync,
    Propose,
    Delete,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Sync => "sync",
            CommandKind::Propose => "propose",
            CommandKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Stopped on a recoverable failure or an interrupt.
    Suspended,
    /// Stopped on a fatal failure; undo is still available.
    Aborted,
    Completed,
    /// An undo stopped part-way; `run_program` is unused and
    /// `undo_api_program` holds the remaining undo steps.
    Undoing,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Running => "running",
            RunStatus::Suspended => "suspended",
            RunStatus::Aborted => "aborted",
            RunStatus::Completed => "completed",
            RunStatus::Undoing => "undoing",
        };
        f.write_str(name)
    }
}

/// Everything needed to continue, skip or undo a workflow after the process exits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    pub version: u32,
    pub command: CommandKind,
    pub dry_run: bool,
    pub status: RunStatus,
    /// Cause of the last suspension or abort.
    pub failure: Option<String>,
    pub initial_branch: BranchName,
    pub begin_branches_snapshot: BranchesSnapshot,
    pub end_branches_snapshot: Option<BranchesSnapshot>,
    pub begin_config_snapshot: ConfigSnapshot,
    pub end_config_snapshot: Option<ConfigSnapshot>,
    pub begin_stash_size: StashSize,
    pub end_stash_size: Option<StashSize>,
    /// Opcodes still to run, starting with the one that failed.
    pub run_program: Program,
    /// Inverses of every opcode run so far, latest first.
    pub undo_api_program: Program,
    pub touched_branches: BTreeSet<BranchName>,
}

impl RunState {
    pub fn new(
        command: CommandKind,
        dry_run: bool,
        initial_branch: BranchName,
        begin_branches_snapshot: BranchesSnapshot,
        begin_config_snapshot: ConfigSnapshot,
        begin_stash_size: StashSize,
        run_program: Program,
    ) -> Self {
        let touched_branches = run_program.touched_branches();
        Self {
            version: RUN_STATE_VERSION,
            command,
            dry_run,
            status: RunStatus::Running,
            failure: None,
            initial_branch,
            begin_branches_snapshot,
            end_branches_snapshot: None,
            begin_config_snapshot,
            end_config_snapshot: None,
            begin_stash_size,
            end_stash_size: None,
            run_program,
            undo_api_program: Program::new(),
            touched_branches,
        }
    }

    /// Opcode the workflow is stopped on.
    pub fn failing_opcode(&self) -> Option<&Opcode> {
        match self.status {
            RunStatus::Suspended | RunStatus::Aborted => self.run_program.first(),
            _ => None,
        }
    }

    /// `skip` is only offered for merge/rebase conflicts.
    pub fn can_skip(&self) -> bool {
        self.status == RunStatus::Suspended
            && self.run_program.first().is_some_and(Opcode::is_skippable)
    }
}

/// Handle on the single run-state record of a repository.
#[derive(Debug, Clone)]
pub struct RunStateStore {
    path: PathBuf,
}

impl RunStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load and validate the record. `None` when no workflow is in flight.
    pub fn load(&self) -> Result<Option<RunState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        debug!(path = %self.path.display(), "loading run state");
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read run state {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse run state {}", self.path.display()))?;
        check_version(&value)?;
        validate_schema(&value)
            .with_context(|| format!("invalid run state {}", self.path.display()))?;
        let state: RunState = serde_json::from_value(value)
            .with_context(|| format!("deserialize run state {}", self.path.display()))?;
        debug!(
            command = %state.command,
            status = %state.status,
            remaining = state.run_program.len(),
            undo = state.undo_api_program.len(),
            "run state loaded"
        );
        Ok(Some(state))
    }

    /// Persist the first checkpoint of a new workflow. Fails without writing
    /// when a workflow is already in progress.
    pub fn create(&self, state: &RunState) -> Result<()> {
        if self.exists() {
            bail!(
                "a {} workflow is already in progress; run `stackflow continue`, `stackflow skip` or `stackflow undo` first",
                self.load()?
                    .map_or_else(|| "previous".to_string(), |s| s.command.to_string())
            );
        }
        self.save(state)
    }

    /// Atomically write the record (temp file + rename).
    pub fn save(&self, state: &RunState) -> Result<()> {
        debug!(
            path = %self.path.display(),
            status = %state.status,
            remaining = state.run_program.len(),
            "writing run state"
        );
        let mut buf = serde_json::to_string_pretty(state)?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }

    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            debug!(path = %self.path.display(), "deleting run state");
            fs::remove_file(&self.path)
                .with_context(|| format!("remove run state {}", self.path.display()))?;
        }
        Ok(())
    }
}

fn check_version(value: &Value) -> Result<()> {
    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("run state has no version"))?;
    if version != u64::from(RUN_STATE_VERSION) {
        bail!(
            "unsupported run state version {version} (expected {RUN_STATE_VERSION}); delete the file to start over"
        );
    }
    Ok(())
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(RUN_STATE_SCHEMA).context("parse run state schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "run state schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run state {}", path.display()))?;
    Ok(())
}
