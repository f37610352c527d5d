//! # Structured Logging
//!
//! Initializes the global `tracing` subscriber. The default level comes
//! from `MERIDIAN_LOG_LEVEL` (trace|debug|info|warn|error); `RUST_LOG`
//! overrides it with full filter syntax. Output goes to stderr so
//! stdout stays free for structured data.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Call exactly once, early in `main`.
pub fn init_logging() {
    let default_level =
        std::env::var("MERIDIAN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("meridian_node={default_level},meridian_protocol={default_level}")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}
