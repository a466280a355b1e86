//! Fallback resolver
//!
//! Resolves domains against a list of plain UDP DNS servers when an upstream
//! cannot take a domain destination itself. Servers are tried in order, A
//! before AAAA; the first non-empty answer wins and is cached with its
//! smallest record TTL.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::cache::IpCache;
use super::error::{DnsError, DnsResult};

/// Receive buffer size, large enough for EDNS0 responses
const UDP_RECV_BUFFER_SIZE: usize = 4096;

/// Default per-exchange timeout
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache-backed UDP resolver
#[derive(Debug, Clone)]
pub struct Resolver {
    servers: Vec<SocketAddr>,
    cache: Arc<IpCache>,
    timeout: Duration,
}

impl Resolver {
    /// Create a resolver over `servers` with a fresh cache
    #[must_use]
    pub fn new(servers: Vec<SocketAddr>) -> Self {
        Self {
            servers,
            cache: Arc::new(IpCache::new()),
            timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Share an existing answer cache
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<IpCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Set the per-exchange timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The answer cache
    pub fn cache(&self) -> &Arc<IpCache> {
        &self.cache
    }

    /// Configured servers, in query order
    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Resolve `domain` to its addresses
    ///
    /// # Errors
    ///
    /// Returns `DnsError::NoUpstream` if no servers are configured, or
    /// `DnsError::ResolutionError` carrying the last server failure.
    pub async fn resolve(&self, domain: &str) -> DnsResult<Vec<IpAddr>> {
        if let Some(ips) = self.cache.query(domain) {
            if !ips.is_empty() {
                trace!(domain, "resolved from cache");
                return Ok(ips);
            }
        }
        if self.servers.is_empty() {
            return Err(DnsError::NoUpstream);
        }

        let mut name = Name::from_str(domain)
            .map_err(|e| DnsError::parse(format!("invalid domain {domain}: {e}")))?;
        name.set_fqdn(true);

        let mut last_err = DnsError::NoUpstream;
        for server in &self.servers {
            for record_type in [RecordType::A, RecordType::AAAA] {
                let request = build_request(name.clone(), record_type);
                match self.exchange(*server, &request).await {
                    Ok((response, _)) if response.response_code() != ResponseCode::NoError => {
                        last_err = DnsError::upstream(
                            server,
                            format!("DNS query not success {}", response.response_code()),
                        );
                    }
                    Ok((response, _)) => {
                        if let Some((ips, ttl)) = extract_addresses(&response, record_type) {
                            debug!(domain, %server, count = ips.len(), ttl, "resolved");
                            self.cache.store(domain, ips.clone(), ttl);
                            return Ok(ips);
                        }
                        last_err = DnsError::upstream(server, "no eligible result found");
                    }
                    Err(e) => {
                        trace!(domain, %server, error = %e, "exchange failed");
                        last_err = e;
                    }
                }
            }
        }
        Err(DnsError::resolution(domain, last_err))
    }

    /// Forward a raw query to the servers in order, returning the first reply
    ///
    /// The reply bytes are passed through untouched, negative answers included.
    ///
    /// # Errors
    ///
    /// Returns the last server failure if none replied.
    pub async fn exchange_raw(&self, request: &[u8]) -> DnsResult<Vec<u8>> {
        let query = Message::from_vec(request)
            .map_err(|e| DnsError::parse(format!("failed to parse DNS query: {e}")))?;

        let mut last_err = DnsError::NoUpstream;
        for server in &self.servers {
            match self.exchange(*server, &query).await {
                Ok((_, raw)) => return Ok(raw),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// One UDP round trip against `server`, yielding the parsed and raw reply
    async fn exchange(
        &self,
        server: SocketAddr,
        query: &Message,
    ) -> DnsResult<(Message, Vec<u8>)> {
        let query_bytes = query
            .to_vec()
            .map_err(|e| DnsError::serialize(format!("failed to serialize DNS query: {e}")))?;

        let bind_addr: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| DnsError::network_io("failed to bind UDP socket", e))?;
        socket
            .send_to(&query_bytes, server)
            .await
            .map_err(|e| DnsError::network_io(format!("failed to send UDP query to {server}"), e))?;

        let mut recv_buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
        let (len, src) = match timeout(self.timeout, socket.recv_from(&mut recv_buf)).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                return Err(DnsError::network_io(
                    format!("failed to receive UDP response from {server}"),
                    e,
                ))
            }
            Err(_) => {
                return Err(DnsError::timeout(
                    format!("UDP query to {server}"),
                    self.timeout,
                ))
            }
        };
        if src != server {
            return Err(DnsError::upstream(
                server,
                format!("response from unexpected source: {src}"),
            ));
        }

        let response = Message::from_vec(&recv_buf[..len])
            .map_err(|e| DnsError::parse(format!("failed to parse DNS response: {e}")))?;
        if response.id() != query.id() {
            return Err(DnsError::upstream(server, "response ID mismatch"));
        }
        recv_buf.truncate(len);
        Ok((response, recv_buf))
    }
}

fn build_request(name: Name, record_type: RecordType) -> Message {
    let mut request = Message::new();
    request.set_id(rand::random());
    request.set_message_type(MessageType::Query);
    request.set_op_code(OpCode::Query);
    request.set_recursion_desired(true);
    request.add_query(Query::query(name, record_type));
    request
}

/// Addresses of the requested type plus the smallest TTL among them
fn extract_addresses(response: &Message, record_type: RecordType) -> Option<(Vec<IpAddr>, u32)> {
    let mut ips = Vec::new();
    let mut ttl = u32::MAX;
    for answer in response.answers() {
        let ip = match (record_type, answer.data()) {
            (RecordType::A, Some(RData::A(a))) => IpAddr::V4(a.0),
            (RecordType::AAAA, Some(RData::AAAA(aaaa))) => IpAddr::V6(aaaa.0),
            _ => continue,
        };
        ips.push(ip);
        ttl = ttl.min(answer.ttl());
    }
    if ips.is_empty() {
        None
    } else {
        Some((ips, ttl))
    }
}
