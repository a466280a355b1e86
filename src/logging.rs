//! Logging setup
//!
//! Access records are emitted on the `access` target, so they can be routed
//! or silenced separately, e.g. `RUST_LOG=info,access=off`.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Map a configured level name to a tracing level, defaulting to INFO
#[must_use]
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Build the filter: `RUST_LOG` directives plus the configured level
#[must_use]
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(parse_level(&config.level).into())
}

/// Install the global subscriber
///
/// Calling this twice is harmless; the second install is ignored.
pub fn init_logging(config: &LogConfig) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_filter(config))
        .with_target(config.target);

    // try_init: tests and embedders may have installed one already
    let result = match (config.format.as_str(), config.timestamps) {
        ("json", true) => subscriber.json().try_init(),
        ("json", false) => subscriber.json().without_time().try_init(),
        (_, true) => subscriber.try_init(),
        (_, false) => subscriber.without_time().try_init(),
    };
    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}
