//! Diagnostics via `tracing`, written to stderr.
//!
//! Stdout belongs to the operator trace in the agent and to the wire
//! protocol in the worker, so log lines never go there.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Reads `RUST_LOG`, defaults to `warn`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
