//! Diagnostics for calcplan commands.
//!
//! Command results (plans, reports) go to stdout. Everything logged through
//! `tracing` goes to stderr and is filtered by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset, which still shows
/// limbo artifacts and missing slice files.
///
/// # Example
/// ```bash
/// RUST_LOG=calcplan=debug calcplan compute
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
