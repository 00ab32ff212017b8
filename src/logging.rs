//! Logging init: one-time `tracing-subscriber` setup.

use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber. `quiet` raises the default
/// level so request-by-request logging (emitted at `info!`) is suppressed
/// while warnings and errors still surface.
pub fn init(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
