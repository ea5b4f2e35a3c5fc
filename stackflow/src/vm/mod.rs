//! The workflow virtual machine: opcode execution, dry-run capture and the
//! interpreter state machine.

pub mod context;
pub mod dry_run;
pub mod exec;
pub mod interpreter;
