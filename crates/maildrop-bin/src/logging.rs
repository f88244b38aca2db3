//! Logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize tracing with the given default level.
///
/// `RUST_LOG` overrides the flag when set, so per-module filters still work:
/// `RUST_LOG=delivery_dispatcher=debug maildropd`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
