//! FakeDNS - synthetic addresses for domain-based routing
//!
//! The engine answers A/AAAA queries with addresses taken from a bounded
//! ring and remembers which domain each address stands for. When a flow is
//! later opened towards one of those addresses, relays ask the engine for the
//! domain and dial that instead.
//!
//! ## Features
//!
//! - **Fixed memory**: the ring never grows past the configured range; old
//!   bindings are overwritten in allocation order
//! - **Short-lived answers**: records carry a 1 second TTL
//! - **Persistence**: bindings survive restarts through `fakedns.cache`
//! - **Standalone responder**: optional UDP listener with raw forwarding
//!
//! ## Example
//!
//! ```rust,ignore
//! use flowbridge::fakedns::{FakeDnsConfig, FakeDnsEngine};
//! use std::sync::Arc;
//!
//! let config = FakeDnsConfig::new()
//!     .with_pool("198.18.0.0/16".parse().unwrap())
//!     .with_cache_dir("/var/lib/flowbridge")
//!     .enabled(true);
//!
//! let engine = Arc::new(FakeDnsEngine::new(&config)?);
//! engine.start()?;
//! let response = engine.generate_fake_response(&query_bytes)?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod persist;
pub mod pool;
pub mod query;
mod udp_server;

// Re-export main types for convenience
pub use config::FakeDnsConfig;
pub use engine::{FakeDnsEngine, CACHE_FILE_NAME, FAKE_RESPONSE_TTL};
pub use error::{FakeDnsError, FakeDnsResult, PersistenceError};
pub use pool::FakeIpRing;
pub use query::{parse_dns_query, DnsQuery, QueryKind};
pub use udp_server::FakeDnsUdpServer;
