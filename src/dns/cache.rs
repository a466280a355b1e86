//! DNS answer cache
//!
//! Maps a domain to the addresses a real resolver returned for it, valid
//! until the answer's TTL runs out. Expired entries are evicted lazily on
//! lookup and swept in bulk every [`CLEANUP_INTERVAL`] on store.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

/// Minimum time between two full sweeps
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    ips: Vec<IpAddr>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct CacheState {
    storage: HashMap<String, CacheEntry>,
    last_cleanup: Instant,
}

/// TTL-keyed cache of resolved addresses
///
/// A single mutex guards all access.
#[derive(Debug)]
pub struct IpCache {
    state: Mutex<CacheState>,
}

impl Default for IpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IpCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                storage: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Get the cached addresses for `domain`, evicting the entry if expired
    #[must_use]
    pub fn query(&self, domain: &str) -> Option<Vec<IpAddr>> {
        self.query_at(domain, Instant::now())
    }

    /// Store addresses for `domain`, valid for `ttl_secs` seconds
    pub fn store(&self, domain: &str, ips: Vec<IpAddr>, ttl_secs: u32) {
        self.store_at(domain, ips, ttl_secs, Instant::now());
    }

    /// Number of entries currently held, expired or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().storage.len()
    }

    /// Check if the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn query_at(&self, domain: &str, now: Instant) -> Option<Vec<IpAddr>> {
        let mut state = self.state.lock();
        let entry = state.storage.get(domain)?;
        if entry.is_expired(now) {
            state.storage.remove(domain);
            trace!(domain, "dns cache entry expired");
            return None;
        }
        Some(entry.ips.clone())
    }

    fn store_at(&self, domain: &str, ips: Vec<IpAddr>, ttl_secs: u32, now: Instant) {
        let mut state = self.state.lock();
        state.storage.insert(
            domain.to_string(),
            CacheEntry {
                ips,
                expires_at: now + Duration::from_secs(u64::from(ttl_secs)),
            },
        );

        if now.saturating_duration_since(state.last_cleanup) > CLEANUP_INTERVAL {
            let before = state.storage.len();
            state.storage.retain(|_, entry| !entry.is_expired(now));
            state.last_cleanup = now;
            trace!(removed = before - state.storage.len(), "dns cache swept");
        }
    }
}
