//! flowbridge: Fake-DNS routing and flow relays for virtual interfaces
//!
//! This crate sits between a virtual network interface (a TUN-backed
//! userspace stack) and a proxy backend. Applications resolve names against
//! a synthetic address range; connections towards those addresses are then
//! dialed upstream by domain name.
//!
//! # Features
//!
//! - **Fake-DNS**: Synthetic A/AAAA answers from a fixed IPv4 ring, with
//!   reverse lookup and on-disk persistence
//! - **TCP relay**: Bidirectional copy with half-close and byte accounting
//! - **UDP relay**: Per-flow upstream sockets, DNS interception and
//!   inactivity expiry
//! - **Sessions**: Live and recently completed flow records with the
//!   owning process chain
//!
//! # Architecture
//!
//! ```text
//! App → DNS query → Fake-DNS engine → 172.30.x.y
//! App → connect(172.30.x.y:443) → TUN stack → relay handler
//!                                               ↓
//!                                     query_domain(172.30.x.y)
//!                                               ↓
//!                                 dialer.dial_tcp("example.com:443")
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowbridge::config::FakeDnsConfig;
//! use flowbridge::fakedns::FakeDnsEngine;
//! use flowbridge::relay::{DirectDialer, TcpRelayHandler};
//! use flowbridge::session::SessionRegistry;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(FakeDnsEngine::new(&FakeDnsConfig::new().enabled(true))?);
//! engine.start()?;
//!
//! let handler = TcpRelayHandler::new(Arc::new(DirectDialer::new()))
//!     .with_fake_dns(Arc::clone(&engine))
//!     .with_sessions(Arc::new(SessionRegistry::default()));
//!
//! // Feed accepted virtual connections to `handler.handle(conn, target)`...
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`dns`]: Upstream resolver and answer cache
//! - [`error`]: Error types
//! - [`fakedns`]: Fake-DNS engine, persistence and UDP responder
//! - [`logging`]: Subscriber setup
//! - [`proc`]: Owning-process lookup
//! - [`relay`]: TCP and UDP relay handlers
//! - [`session`]: Session records and registry

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod dns;
pub mod error;
pub mod fakedns;
pub mod logging;
pub mod proc;
pub mod relay;
pub mod session;

// Re-export commonly used types at the crate root
pub use config::{Config, FakeDnsConfig};
pub use dns::{IpCache, Resolver};
pub use error::{ConfigError, DialError, FlowBridgeError, FlowError};
pub use fakedns::FakeDnsEngine;
pub use relay::{TargetAddr, TcpRelayHandler, UdpRelayHandler, UpstreamDialer};
pub use session::{Session, SessionRegistry, SessionReport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
