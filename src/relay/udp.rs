//! UDP relay handler
//!
//! Each virtual UDP socket maps to one upstream datagram socket. Datagrams
//! towards port 53 are offered to Fake-DNS first; a synthesized answer goes
//! straight back to the application and ends the flow. Flows expire after a
//! period without traffic.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::idle::ActivityTimer;
use super::tcp::DEFAULT_OUTBOUND_TAG;
use super::traits::{resolve_destination, UpstreamDatagram, UpstreamDialer, VirtualUdpConn};
use crate::config::UdpConfig;
use crate::dns::DNS_PORT;
use crate::error::FlowError;
use crate::fakedns::{parse_dns_query, FakeDnsEngine};
use crate::proc::{platform_resolver, resolve_or_unknown, ProcessResolver, UNKNOWN_PROCESS};
use crate::session::{FlowKey, Network, Session, SessionRegistry};

/// Default inactivity cutoff for a UDP flow
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(60);

/// Inactivity window once a flow is seen carrying DNS queries
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(8);

/// Largest datagram the receive loop accepts
const MAX_DATAGRAM_SIZE: usize = 65535;

struct UdpFlowEntry {
    /// Distinguishes a flow from a later one reusing the same key
    id: u64,
    upstream: Arc<dyn UpstreamDatagram>,
    /// Every inbound datagram is attributed to this address
    target: SocketAddr,
    timer: Arc<ActivityTimer>,
    lifetime: CancellationToken,
    session: Option<Arc<Session>>,
}

struct UdpInner {
    dialer: Arc<dyn UpstreamDialer>,
    fake_dns: Option<Arc<FakeDnsEngine>>,
    sessions: Option<Arc<SessionRegistry>>,
    process_resolver: Arc<dyn ProcessResolver>,
    timeout: Duration,
    dns_timeout: Duration,
    outbound_tag: String,
    next_id: AtomicU64,
    conns: Mutex<HashMap<FlowKey, UdpFlowEntry>>,
}

/// Relays virtual UDP sockets to the upstream
#[derive(Clone)]
pub struct UdpRelayHandler {
    inner: Arc<UdpInner>,
}

/// Builder for [`UdpRelayHandler`]
pub struct UdpRelayHandlerBuilder {
    dialer: Arc<dyn UpstreamDialer>,
    fake_dns: Option<Arc<FakeDnsEngine>>,
    sessions: Option<Arc<SessionRegistry>>,
    process_resolver: Arc<dyn ProcessResolver>,
    timeout: Duration,
    dns_timeout: Duration,
    outbound_tag: String,
}

impl UdpRelayHandlerBuilder {
    /// Intercept DNS through `engine` and map fake destinations
    #[must_use]
    pub fn fake_dns(mut self, engine: Arc<FakeDnsEngine>) -> Self {
        self.fake_dns = Some(engine);
        self
    }

    /// Track flows in `registry`
    #[must_use]
    pub fn sessions(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(registry);
        self
    }

    /// Attribute flows with `resolver`
    #[must_use]
    pub fn process_resolver(mut self, resolver: Arc<dyn ProcessResolver>) -> Self {
        self.process_resolver = resolver;
        self
    }

    /// Set the generic inactivity cutoff
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the inactivity window for flows carrying DNS
    #[must_use]
    pub fn dns_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = timeout;
        self
    }

    /// Set the outbound tag recorded in sessions and access logs
    #[must_use]
    pub fn outbound_tag(mut self, tag: impl Into<String>) -> Self {
        self.outbound_tag = tag.into();
        self
    }

    /// Take both inactivity windows from `config`
    #[must_use]
    pub fn config(self, config: &UdpConfig) -> Self {
        self.timeout(config.timeout()).dns_timeout(config.dns_timeout())
    }

    /// Build the handler
    #[must_use]
    pub fn build(self) -> UdpRelayHandler {
        UdpRelayHandler {
            inner: Arc::new(UdpInner {
                dialer: self.dialer,
                fake_dns: self.fake_dns,
                sessions: self.sessions,
                process_resolver: self.process_resolver,
                timeout: self.timeout,
                dns_timeout: self.dns_timeout,
                outbound_tag: self.outbound_tag,
                next_id: AtomicU64::new(0),
                conns: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl UdpRelayHandler {
    /// Start building a handler dialing through `dialer`
    pub fn builder(dialer: Arc<dyn UpstreamDialer>) -> UdpRelayHandlerBuilder {
        UdpRelayHandlerBuilder {
            dialer,
            fake_dns: None,
            sessions: None,
            process_resolver: platform_resolver(),
            timeout: DEFAULT_UDP_TIMEOUT,
            dns_timeout: DEFAULT_DNS_TIMEOUT,
            outbound_tag: DEFAULT_OUTBOUND_TAG.to_string(),
        }
    }

    /// Open the upstream socket for `conn` and start its receive loop
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Dial` if the upstream socket cannot be opened; no
    /// flow entry is created in that case.
    pub async fn connect(
        &self,
        conn: Arc<dyn VirtualUdpConn>,
        target: SocketAddr,
    ) -> Result<(), FlowError> {
        let inner = &self.inner;
        let local = conn.local_addr();
        let key = FlowKey::udp(local);

        let resolver = Arc::clone(&inner.process_resolver);
        let processes = tokio::task::spawn_blocking(move || {
            resolve_or_unknown(&*resolver, Network::Udp, local)
        })
        .await
        .unwrap_or_else(|_| vec![UNKNOWN_PROCESS.to_string()]);

        let upstream = inner.dialer.dial_udp().await.map_err(|e| {
            debug!("dial udp upstream for {} failed: {}", local, e);
            FlowError::Dial(e)
        })?;

        // A stale flow under the same key is retired first
        inner.retire(&key, None, false);

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let lifetime = CancellationToken::new();
        let timer = ActivityTimer::spawn(lifetime.clone(), inner.timeout);
        let timer_handle = Arc::clone(&timer);

        let session = inner.sessions.as_ref().map(|registry| {
            let session = Arc::new(
                Session::new(processes.clone(), Network::Udp, local, target)
                    .with_outbound_tag(inner.outbound_tag.clone()),
            );
            registry.add_session(key, Arc::clone(&session));
            session
        });

        inner.conns.lock().insert(
            key,
            UdpFlowEntry {
                id,
                upstream: Arc::clone(&upstream),
                target,
                timer,
                lifetime: lifetime.clone(),
                session: session.clone(),
            },
        );

        tokio::spawn(Arc::clone(inner).fetch_input(
            key, id, conn, upstream, target, timer_handle, lifetime, session,
        ));

        info!(
            target: "access",
            process = %processes.first().map_or(UNKNOWN_PROCESS, String::as_str),
            outbound = %inner.outbound_tag,
            network = "udp",
            local = %local,
            remote = %target,
            "accepted"
        );
        Ok(())
    }

    /// Forward one datagram from the application towards `addr`
    ///
    /// # Errors
    ///
    /// - `FlowError::DnsAnswer` if a synthesized answer cannot be delivered
    /// - `FlowError::WriteRemote` if the upstream send fails (flow closed)
    /// - `FlowError::NotFound` if `conn` has no flow (closed defensively)
    pub async fn receive_to(
        &self,
        conn: &Arc<dyn VirtualUdpConn>,
        data: &[u8],
        addr: SocketAddr,
    ) -> Result<(), FlowError> {
        let inner = &self.inner;

        if addr.port() == DNS_PORT {
            if let Some(engine) = &inner.fake_dns {
                if let Ok(response) = engine.generate_fake_response(data) {
                    let written = conn.write_from(&response, addr).await;
                    self.close_nolog(conn.as_ref());
                    return written.map(|_| ()).map_err(FlowError::DnsAnswer);
                }
            }
        }

        let key = FlowKey::udp(conn.local_addr());
        let flow = inner.conns.lock().get(&key).map(|entry| {
            (
                Arc::clone(&entry.upstream),
                Arc::clone(&entry.timer),
                entry.session.clone(),
            )
        });
        let Some((upstream, timer, session)) = flow else {
            self.close(conn.as_ref());
            return Err(FlowError::not_found(conn.local_addr(), addr));
        };

        if addr.port() == DNS_PORT {
            if let Ok(query) = parse_dns_query(data) {
                timer.set_timeout(inner.dns_timeout);
                if let Some(session) = &session {
                    session.set_extra(format!("dns:{}", query.domain));
                }
            }
        }

        let destination = resolve_destination(inner.fake_dns.as_deref(), addr);
        match upstream.send_to(data, &destination).await {
            Ok(n) => {
                if n > 0 {
                    timer.update();
                    if let Some(session) = &session {
                        session.add_upload_bytes(n as u64);
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.close(conn.as_ref());
                Err(FlowError::WriteRemote(e))
            }
        }
    }

    /// Tear down the flow of `conn`, emitting an access record
    pub fn close(&self, conn: &dyn VirtualUdpConn) {
        self.inner.close(conn, true);
    }

    /// Tear down the flow of `conn` without an access record
    pub fn close_nolog(&self, conn: &dyn VirtualUdpConn) {
        self.inner.close(conn, false);
    }

    /// Number of open flows
    #[must_use]
    pub fn flow_count(&self) -> usize {
        self.inner.conns.lock().len()
    }
}

impl UdpInner {
    /// Receive loop: upstream datagrams go back to the application as if sent
    /// by the recorded target
    #[allow(clippy::too_many_arguments)]
    async fn fetch_input(
        self: Arc<Self>,
        key: FlowKey,
        id: u64,
        conn: Arc<dyn VirtualUdpConn>,
        upstream: Arc<dyn UpstreamDatagram>,
        target: SocketAddr,
        timer: Arc<ActivityTimer>,
        lifetime: CancellationToken,
        session: Option<Arc<Session>>,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received = tokio::select! {
                () = lifetime.cancelled() => {
                    trace!("udp flow {} cancelled", key);
                    break;
                }
                r = upstream.recv_from(&mut buf) => r,
            };
            let n = match received {
                Ok((n, _from)) => n,
                Err(e) => {
                    debug!("udp flow {} upstream read failed: {}", key, e);
                    break;
                }
            };

            timer.update();
            if let Some(session) = &session {
                session.add_download_bytes(n as u64);
            }
            if let Err(e) = conn.write_from(&buf[..n], target).await {
                debug!("udp flow {} write back failed: {}", key, e);
                break;
            }
        }
        if self.retire(&key, Some(id), true) {
            conn.close();
        }
    }

    fn close(&self, conn: &dyn VirtualUdpConn, log: bool) {
        conn.close();
        self.retire(&FlowKey::udp(conn.local_addr()), None, log);
    }

    /// Remove the flow under `key`, restricted to flow `only_id` if given
    ///
    /// Returns whether a flow was removed.
    fn retire(&self, key: &FlowKey, only_id: Option<u64>, log: bool) -> bool {
        let entry = {
            let mut conns = self.conns.lock();
            match conns.get(key) {
                Some(entry) if only_id.map_or(true, |id| entry.id == id) => conns.remove(key),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            return false;
        };
        entry.lifetime.cancel();
        entry.upstream.close();

        let snapshot = self
            .sessions
            .as_ref()
            .and_then(|registry| registry.remove_session(key));
        if log {
            let (up, down) = snapshot
                .map(|s| (s.upload_bytes, s.download_bytes))
                .or_else(|| {
                    entry
                        .session
                        .as_ref()
                        .map(|s| (s.upload_bytes(), s.download_bytes()))
                })
                .unwrap_or_default();
            info!(
                target: "access",
                network = "udp",
                local = %key.local,
                remote = %entry.target,
                upload = up,
                download = down,
                "closed"
            );
        }
        true
    }
}
