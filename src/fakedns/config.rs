//! Fake-DNS configuration types
//!
//! This module provides configuration for the Fake-DNS engine: the synthetic
//! address range, the persistence directory and the exclusion filters.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use super::engine::CACHE_FILE_NAME;
use crate::error::ConfigError;

/// Configuration for the Fake-DNS engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeDnsConfig {
    /// Whether Fake-DNS synthesis is enabled
    #[serde(default)]
    pub enabled: bool,

    /// First address of the fake range (inclusive)
    ///
    /// Default: 172.30.0.0
    #[serde(default = "default_min_ip")]
    pub min_ip: Ipv4Addr,

    /// Last address of the fake range (inclusive)
    ///
    /// Default: 172.30.16.255
    #[serde(default = "default_max_ip")]
    pub max_ip: Ipv4Addr,

    /// Directory holding `fakedns.cache`
    ///
    /// When unset, state is neither restored nor persisted.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Domain keywords that are never synthesized
    #[serde(default)]
    pub exclude_domains: Vec<String>,

    /// Optional standalone UDP listener answering with fake records
    #[serde(default)]
    pub listen: Option<SocketAddr>,
}

impl Default for FakeDnsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_ip: default_min_ip(),
            max_ip: default_max_ip(),
            cache_dir: None,
            exclude_domains: Vec::new(),
            listen: None,
        }
    }
}

impl FakeDnsConfig {
    /// Create a new FakeDnsConfig with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inclusive address range
    #[must_use]
    pub fn with_range(mut self, min_ip: Ipv4Addr, max_ip: Ipv4Addr) -> Self {
        self.min_ip = min_ip;
        self.max_ip = max_ip;
        self
    }

    /// Use every address of a CIDR block as the range
    #[must_use]
    pub fn with_pool(self, pool: Ipv4Net) -> Self {
        self.with_range(pool.network(), pool.broadcast())
    }

    /// Set the persistence directory
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set the exclusion filters
    #[must_use]
    pub fn with_exclude_domains<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_domains = filters
            .into_iter()
            .map(Into::into)
            .map(|f: String| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        self
    }

    /// Set the standalone listener address
    #[must_use]
    pub fn with_listen(mut self, addr: SocketAddr) -> Self {
        self.listen = Some(addr);
        self
    }

    /// Enable or disable Fake-DNS
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Split a comma-separated keyword list, dropping blank entries
    #[must_use]
    pub fn parse_excludes(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect()
    }

    /// Number of addresses in the range
    #[must_use]
    pub fn capacity(&self) -> u64 {
        u64::from(u32::from(self.max_ip)).saturating_sub(u64::from(u32::from(self.min_ip))) + 1
    }

    /// Full path of the cache file, if persistence is configured
    #[must_use]
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(CACHE_FILE_NAME))
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the range is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if u32::from(self.min_ip) > u32::from(self.max_ip) {
            return Err(ConfigError::ValidationError(format!(
                "fakedns min_ip {} is greater than max_ip {}",
                self.min_ip, self.max_ip
            )));
        }
        Ok(())
    }
}

const fn default_min_ip() -> Ipv4Addr {
    Ipv4Addr::new(172, 30, 0, 0)
}

const fn default_max_ip() -> Ipv4Addr {
    Ipv4Addr::new(172, 30, 16, 255)
}
