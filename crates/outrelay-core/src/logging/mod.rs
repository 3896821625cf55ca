//! Structured logging with `tracing`.
//!
//! The relay logs through `tracing` macros with structured fields
//! (`session`, `remote`, `error`). This module provides:
//!
//! - [`init_subscriber`] for setting up the process-wide subscriber
//! - [`test_utils`] for capturing events in tests

pub mod test_utils;

pub use test_utils::{CapturedLogs, capture_logs};

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at startup. `RUST_LOG` takes precedence over `level`.
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // set_global_default is a no-op if already set
    let _ = subscriber.try_init();
}

/// Log level name for the `--debug` switch.
pub fn level_for(debug: bool, configured: &str) -> &str {
    if debug { "debug" } else { configured }
}
