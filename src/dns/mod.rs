//! Real DNS resolution
//!
//! Flows towards real addresses never touch this module. It backs the paths
//! that need an actual answer: dialing a domain destination through an
//! upstream that only takes IPs, and forwarding queries the Fake-DNS
//! responder declines to synthesize.
//!
//! - [`IpCache`]: TTL-keyed cache of resolved addresses
//! - [`Resolver`]: ordered plain UDP servers in front of that cache

pub mod cache;
pub mod error;
pub mod resolver;

pub use cache::{IpCache, CLEANUP_INTERVAL};
pub use error::{DnsError, DnsResult};
pub use resolver::{Resolver, DEFAULT_RESOLVE_TIMEOUT};

/// Well-known DNS port; datagrams towards it are offered to Fake-DNS
pub const DNS_PORT: u16 = 53;
