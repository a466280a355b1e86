//! Fake-DNS engine
//!
//! Answers admissible A/AAAA queries with addresses from a bounded ring and
//! later maps those addresses back to the queried domain, so relays can dial
//! the domain instead of a synthetic IP.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use hickory_proto::op::{Header, Message};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, RData, Record};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::config::FakeDnsConfig;
use super::error::{FakeDnsError, FakeDnsResult, PersistenceError};
use super::persist;
use super::pool::FakeIpRing;
use super::query::{parse_dns_query, DnsQuery, QueryKind};

/// File name of the persisted ring inside the cache directory
pub const CACHE_FILE_NAME: &str = "fakedns.cache";

/// TTL of synthesized records, in seconds
///
/// Bindings may be recycled at any time, so clients must not hold on to them.
pub const FAKE_RESPONSE_TTL: u32 = 1;

/// Fake-DNS engine shared by every relay handler
#[derive(Debug)]
pub struct FakeDnsEngine {
    /// Slot table; compound allocate-then-read needs the lock
    ring: Mutex<FakeIpRing>,
    min: Ipv4Addr,
    max: Ipv4Addr,
    cache_path: Option<PathBuf>,
    exclude_domains: Vec<String>,
}

impl FakeDnsEngine {
    /// Create an engine with an empty ring
    ///
    /// # Errors
    ///
    /// Returns `FakeDnsError::InvalidRange` if `min_ip > max_ip`.
    pub fn new(config: &FakeDnsConfig) -> FakeDnsResult<Self> {
        if u32::from(config.min_ip) > u32::from(config.max_ip) {
            return Err(FakeDnsError::InvalidRange {
                min: config.min_ip,
                max: config.max_ip,
            });
        }
        Ok(Self {
            ring: Mutex::new(FakeIpRing::new(config.min_ip, config.max_ip)),
            min: config.min_ip,
            max: config.max_ip,
            cache_path: config.cache_path(),
            exclude_domains: config.exclude_domains.clone(),
        })
    }

    /// Restore persisted bindings, if a cache path is configured and exists
    ///
    /// On error the ring is left untouched and the engine stays usable.
    ///
    /// # Errors
    ///
    /// Returns a `PersistenceError` for unreadable or malformed cache files.
    pub fn start(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        info!("Restoring Fake DNS records from cache {:?}", path);
        let state = persist::load(path, u32::from(self.min), u32::from(self.max))?;
        let restored = state.slots.len();
        self.ring.lock().restore(state.cursor, state.slots);
        info!("Restored {} Fake DNS records", restored);
        Ok(())
    }

    /// Persist the current bindings, if a cache path is configured
    ///
    /// # Errors
    ///
    /// Returns a `PersistenceError` if the file cannot be written.
    pub fn stop(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };

        let (cursor, bindings) = {
            let ring = self.ring.lock();
            (ring.cursor(), ring.bindings())
        };
        info!("Saving {} Fake DNS records to cache {:?}", bindings.len(), path);
        persist::save(path, cursor, &bindings)
    }

    /// Synthesize an answer for a raw DNS query
    ///
    /// # Errors
    ///
    /// Returns an error if the query is not admissible; callers treat that as
    /// "resolve normally".
    pub fn generate_fake_response(&self, request: &[u8]) -> FakeDnsResult<Vec<u8>> {
        let query = self.admit(request)?;
        let ip = self.allocate_ip(&query.domain);
        debug!("fake dns allocated ip {} for domain {}", ip, query.domain);

        let response = build_response(&query, ip);
        response
            .to_vec()
            .map_err(|e| FakeDnsError::Encode(e.to_string()))
    }

    /// Look up the domain currently bound to `ip`
    #[must_use]
    pub fn query_domain(&self, ip: IpAddr) -> Option<String> {
        let v4 = as_ipv4(ip)?;
        let domain = self.ring.lock().lookup(v4).map(String::from);
        if let Some(domain) = &domain {
            debug!("fake dns returns domain {} for ip {}", domain, ip);
        }
        domain
    }

    /// Check if `ip` lies within the fake range, regardless of bindings
    #[must_use]
    pub fn is_fake_ip(&self, ip: IpAddr) -> bool {
        as_ipv4(ip).is_some_and(|v4| (self.min..=self.max).contains(&v4))
    }

    /// Number of addresses in the range
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.ring.lock().capacity()
    }

    /// Number of currently bound addresses
    #[must_use]
    pub fn bound(&self) -> usize {
        self.ring.lock().len()
    }

    fn admit(&self, request: &[u8]) -> FakeDnsResult<DnsQuery> {
        let query = parse_dns_query(request).map_err(|e| {
            debug!("cannot handle dns query: {}", e);
            e
        })?;
        if let Some(filter) = self
            .exclude_domains
            .iter()
            .find(|filter| query.domain.contains(filter.as_str()))
        {
            debug!("fake dns skips {} by filter {}", query.domain, filter);
            return Err(FakeDnsError::Excluded {
                domain: query.domain,
                filter: filter.clone(),
            });
        }
        Ok(query)
    }

    fn allocate_ip(&self, domain: &str) -> Ipv4Addr {
        self.ring.lock().allocate(domain)
    }
}

/// Build the reply message carrying one record for the allocated address
///
/// AAAA answers carry the IPv4-mapped form of the fake address, which
/// [`FakeDnsEngine::query_domain`] maps back.
fn build_response(query: &DnsQuery, ip: Ipv4Addr) -> Message {
    let request = &query.message;
    let question = &request.queries()[0];

    let mut response = Message::new();
    response.set_header(Header::response_from_request(request.header()));
    response.add_query(question.clone());

    let rdata = match query.kind {
        QueryKind::A => RData::A(A(ip)),
        QueryKind::Aaaa => RData::AAAA(AAAA(ip.to_ipv6_mapped())),
    };
    let mut record = Record::from_rdata(question.name().clone(), FAKE_RESPONSE_TTL, rdata);
    record.set_dns_class(DNSClass::IN);
    response.add_answer(record);
    response
}

fn as_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}
