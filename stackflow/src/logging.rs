//! Diagnostic tracing for stackflow.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. User-facing
//! progress is printed to stdout by the commands and is unaffected.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `stackflow=debug` when `verbose`
/// is set. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=stackflow=trace stackflow sync
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "warn,stackflow=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
