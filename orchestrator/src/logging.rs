//! Diagnostic tracing for the orchestrator binary.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG`. Command results are
//! printed to stdout as JSON and never mixed with diagnostics. Cycle history
//! itself lives in `state.json`, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber. Defaults to `warn` if `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=orchestrator=debug orchestrator cycle
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
