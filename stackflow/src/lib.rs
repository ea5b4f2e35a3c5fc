//! Multi-branch git workflow engine.
//!
//! Commands such as `sync`, `propose` and `delete` are planned as a program
//! of small opcodes and run by an interpreter that persists its progress, so
//! a workflow interrupted by a conflict can be continued, skipped or undone.
//!
//! - **[`core`]**: Pure data and logic (branches, opcodes, programs, the
//!   optimizer). No I/O.
//! - **[`io`]**: Side effects (git, config and run-state files, forges,
//!   the browser, locking).
//! - **[`plan`]**: Turns a command plus prefetched repository data into a program.
//! - **[`vm`]**: Executes programs, records inverses, supports dry runs.
//! - **[`commands`]**: Orchestration behind each CLI subcommand.

pub mod commands;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod vm;
