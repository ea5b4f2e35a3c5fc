//! Capabilities opcodes run against.

use crate::io::backend::Repository;
use crate::io::browser::Browser;
use crate::io::config::ConfigStore;
use crate::io::forge::Forge;

/// Borrowed handles on everything an opcode may read or change.
///
/// Dry runs swap each handle for a recording wrapper; opcodes cannot tell
/// the difference.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub repo: &'a dyn Repository,
    pub config: &'a dyn ConfigStore,
    /// `None` when the remote is not on a known forge.
    pub forge: Option<&'a dyn Forge>,
    pub browser: &'a dyn Browser,
}
