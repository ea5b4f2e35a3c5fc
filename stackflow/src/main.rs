//! `stackflow`: keep stacks of git branches in sync and proposed.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::warn;

use stackflow::commands::propose::ProposeArgs;
use stackflow::commands::{self, CommandOutcome, RunOptions};
use stackflow::core::branch::BranchName;
use stackflow::exit_codes;
use stackflow::logging;
use stackflow::plan::sync::SyncScope;

#[derive(Parser)]
#[command(
    name = "stackflow",
    version,
    about = "Sync, propose and clean up stacks of git branches"
)]
struct Cli {
    /// Print debug diagnostics to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run as if started in this directory.
    #[arg(short = 'C', long = "dir", global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Update the current branch and its ancestors from their parents and remotes.
    Sync {
        /// Sync every branch in the current stack.
        #[arg(long, conflicts_with = "all")]
        stack: bool,
        /// Sync every local branch.
        #[arg(long)]
        all: bool,
        /// Print what would run without changing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Sync, push and open or create proposals for the current branch.
    Propose {
        /// Propose every branch in the current stack.
        #[arg(long)]
        stack: bool,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete a branch locally and remotely, handing its children to its parent.
    Delete {
        branch: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Resume the stopped workflow after resolving conflicts.
    Continue,
    /// Skip the branch the workflow stopped on.
    Skip,
    /// Revert everything the stopped workflow did.
    Undo,
    /// Show the workflow in progress.
    Status,
    /// Record the parent of a branch.
    SetParent { branch: String, parent: String },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

/// Flag set on SIGINT/SIGTERM so the interpreter stops at the next opcode
/// boundary and leaves a resumable run-state.
fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&flag)) {
            warn!(signal, error = %err, "cannot install signal handler");
        }
    }
    flag
}

fn run(cli: Cli) -> Result<CommandOutcome> {
    let dir = cli.dir.as_path();
    let options = |dry_run: bool| RunOptions {
        dry_run,
        interrupt: Some(interrupt_flag()),
    };
    match cli.command {
        Command::Sync {
            stack,
            all,
            dry_run,
        } => {
            let scope = if all {
                SyncScope::All
            } else if stack {
                SyncScope::Stack
            } else {
                SyncScope::Current
            };
            commands::sync::sync(dir, scope, &options(dry_run))
        }
        Command::Propose {
            stack,
            title,
            body,
            dry_run,
        } => {
            let args = ProposeArgs {
                scope: if stack {
                    SyncScope::Stack
                } else {
                    SyncScope::Current
                },
                title,
                body,
            };
            commands::propose::propose(dir, &args, &options(dry_run))
        }
        Command::Delete { branch, dry_run } => {
            commands::delete::delete(dir, &BranchName::new(branch), &options(dry_run))
        }
        Command::Continue => commands::resume::continue_run(dir, &options(false)),
        Command::Skip => commands::resume::skip(dir, &options(false)),
        Command::Undo => commands::resume::undo(dir),
        Command::Status => commands::resume::status(dir),
        Command::SetParent { branch, parent } => commands::set_parent::set_parent(
            dir,
            &BranchName::new(branch),
            &BranchName::new(parent),
        ),
    }
}
