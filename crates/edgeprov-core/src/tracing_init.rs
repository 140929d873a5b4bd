//! Tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter and optional JSON output.
//! Log lines go to stderr; the status document stays the authoritative
//! progress channel.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for a run: `debug` when verbose, `info` otherwise.
pub const fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "edgeprov_agent=debug,edgeprov_core=debug,info"
    } else {
        "info"
    }
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set.
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
