//! Control flow of the plan phase.

/// Result of gathering the data a planner needs.
///
/// Gathering may change configuration (for example by pruning lineage
/// entries of deleted branches), in which case the command starts over with
/// the updated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramFlow<T> {
    /// Build and run a program from the gathered data.
    Continue(T),
    /// Nothing to do; end the command successfully.
    Exit,
    /// Re-open the repository and gather again.
    Restart,
}

/// Upper bound on plan-phase restarts within one command.
pub const MAX_RESTARTS: u32 = 3;
