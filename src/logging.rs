//! Logging and tracing setup for provider binaries.
//!
//! Logs go to **stderr**; stdout belongs to the plugin handshake of whatever
//! transport hosts the runtime.
//!
//! # Environment Variables
//!
//! - `HEMMER_PROVIDER_LOG`: filter for the provider, takes precedence
//! - `RUST_LOG`: fallback filter
//!
//! ```bash
//! # Trace every diff and state transition of the runtime
//! HEMMER_PROVIDER_LOG=hemmer_provider_runtime=trace ./my-provider
//! ```
//!
//! ```ignore
//! use hemmer_provider_runtime::init_logging;
//!
//! fn main() {
//!     init_logging();
//!     tracing::info!("Provider starting");
//! }
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "HEMMER_PROVIDER_LOG";

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the global subscriber at `info` unless the environment says
/// otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`], with `default_level` used when neither variable is
/// set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if a subscriber is already set.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}
