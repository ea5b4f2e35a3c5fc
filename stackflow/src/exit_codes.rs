//! Stable exit codes for stackflow CLI commands.

/// Command succeeded, or the workflow completed.
pub const OK: i32 = 0;
/// Command failed, or the workflow aborted on a fatal error.
pub const FAILED: i32 = 1;
/// The workflow stopped and waits for `continue`, `skip` or `undo`.
pub const SUSPENDED: i32 = 2;
