//! `tracing` initialization, invoked once from `main`.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber using `directive` as the
/// env-filter (falling back to it only when `RUST_LOG` itself is unset,
/// since `EnvFilter::new` already reads the process environment).
pub fn init(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
