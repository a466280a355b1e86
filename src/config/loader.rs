//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Environment variable overriding `log.level`
pub const ENV_LOG_LEVEL: &str = "FLOWBRIDGE_LOG_LEVEL";

/// Environment variable overriding `fakedns.cache_dir`
pub const ENV_FAKEDNS_CACHE_DIR: &str = "FLOWBRIDGE_FAKEDNS_CACHE_DIR";

/// Environment variable overriding `udp.timeout_secs`
pub const ENV_UDP_TIMEOUT_SECS: &str = "FLOWBRIDGE_UDP_TIMEOUT_SECS";

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: fakedns={}, pool={}-{}, udp timeout={}s",
        config.fakedns.enabled,
        config.fakedns.min_ip,
        config.fakedns.max_ip,
        config.udp.timeout_secs
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `FLOWBRIDGE_LOG_LEVEL`: Override log level
/// - `FLOWBRIDGE_FAKEDNS_CACHE_DIR`: Override the Fake-DNS cache directory
/// - `FLOWBRIDGE_UDP_TIMEOUT_SECS`: Override the UDP inactivity cutoff
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides looked up through `lookup`, then re-validate
pub(crate) fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(dir) = lookup(ENV_FAKEDNS_CACHE_DIR) {
        config.fakedns.cache_dir = if dir.is_empty() { None } else { Some(dir.into()) };
        debug!(
            "Fake DNS cache directory overridden to {:?}",
            config.fakedns.cache_dir
        );
    }

    if let Some(secs) = lookup(ENV_UDP_TIMEOUT_SECS) {
        config.udp.timeout_secs = secs.parse().map_err(|_| ConfigError::EnvError {
            name: ENV_UDP_TIMEOUT_SECS.into(),
            reason: format!("Invalid number: {secs}"),
        })?;
        debug!("UDP timeout overridden to {}s", config.udp.timeout_secs);
    }

    // Re-validate after overrides
    config.validate()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
