//! Deterministic, pure logic shared by the workflow engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod branch;
pub mod flow;
pub mod opcode;
pub mod optimizer;
pub mod program;
pub mod snapshot;
