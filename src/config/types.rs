//! Configuration types
//!
//! All sections are optional in the JSON document; missing fields take the
//! defaults documented on each field.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fakedns::FakeDnsConfig;
use crate::session::SessionRegistry;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Fake-DNS engine configuration
    #[serde(default)]
    pub fakedns: FakeDnsConfig,

    /// UDP relay settings
    #[serde(default)]
    pub udp: UdpConfig,

    /// TCP relay settings
    #[serde(default)]
    pub tcp: TcpConfig,

    /// Session tracking settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Fallback resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate()?;
        self.fakedns.validate()?;
        self.udp.validate()?;
        self.tcp.validate()?;
        self.session.validate()?;
        self.resolver.validate()?;
        Ok(())
    }

    /// Create a default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json", "text" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
            target: true,
        }
    }
}

impl LogConfig {
    /// Validate log configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an unknown format.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.format.as_str() {
            "json" | "text" | "pretty" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "log.format must be \"json\", \"text\" or \"pretty\", got {other:?}"
            ))),
        }
    }
}

/// UDP relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UdpConfig {
    /// Inactivity cutoff per flow, in seconds
    #[serde(default = "default_udp_timeout_secs")]
    pub timeout_secs: u64,

    /// Inactivity window for flows seen carrying DNS, in seconds
    #[serde(default = "default_dns_timeout_secs")]
    pub dns_timeout_secs: u64,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_udp_timeout_secs(),
            dns_timeout_secs: default_dns_timeout_secs(),
        }
    }
}

impl UdpConfig {
    /// Inactivity cutoff as a duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// DNS window as a duration
    #[must_use]
    pub const fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    /// Validate UDP configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for zero timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "udp.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.dns_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "udp.dns_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// TCP relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TcpConfig {
    /// Copy buffer size per direction
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Outbound connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl TcpConfig {
    /// Connect timeout as a duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate TCP configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a zero buffer or timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "tcp.buffer_size must be greater than 0".into(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tcp.connect_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Session tracking configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Track sessions at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Completed sessions retained for reporting
    #[serde(default = "default_max_completed")]
    pub max_completed: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_completed: default_max_completed(),
        }
    }
}

impl SessionConfig {
    /// Registry sized by this section, or `None` when tracking is off
    #[must_use]
    pub fn registry(&self) -> Option<Arc<SessionRegistry>> {
        self.enabled
            .then(|| Arc::new(SessionRegistry::new(self.max_completed)))
    }

    /// Validate session configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a zero cap on an enabled registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.max_completed == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_completed must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Fallback resolver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// DNS servers, queried in order
    #[serde(default = "default_resolver_servers")]
    pub servers: Vec<SocketAddr>,

    /// Per-exchange timeout in seconds
    #[serde(default = "default_resolver_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            servers: default_resolver_servers(),
            timeout_secs: default_resolver_timeout_secs(),
        }
    }
}

impl ResolverConfig {
    /// Exchange timeout as a duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate resolver configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an empty server list or zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::ValidationError(
                "resolver.servers must not be empty".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "resolver.timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

// Default value functions

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

const fn default_udp_timeout_secs() -> u64 {
    60
}

const fn default_dns_timeout_secs() -> u64 {
    8
}

const fn default_buffer_size() -> usize {
    32 * 1024
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_max_completed() -> usize {
    500
}

fn default_resolver_servers() -> Vec<SocketAddr> {
    vec![
        SocketAddr::from(([223, 5, 5, 5], 53)),
        SocketAddr::from(([1, 1, 1, 1], 53)),
    ]
}

const fn default_resolver_timeout_secs() -> u64 {
    5
}
