//! Configuration module for flowbridge
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use flowbridge::config::{load_config, Config};
//!
//! let config = load_config("/etc/flowbridge/config.json").unwrap();
//! println!("Fake DNS enabled: {}", config.fakedns.enabled);
//! ```

mod loader;
mod types;

pub use loader::{
    create_default_config, load_config, load_config_str, load_config_with_env,
    ENV_FAKEDNS_CACHE_DIR, ENV_LOG_LEVEL, ENV_UDP_TIMEOUT_SECS,
};
pub use types::{Config, LogConfig, ResolverConfig, SessionConfig, TcpConfig, UdpConfig};
pub use crate::fakedns::FakeDnsConfig;
