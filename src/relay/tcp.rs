//! TCP relay handler
//!
//! Takes one accepted virtual TCP flow, picks the real destination (a fake
//! address is replaced by its domain), dials the upstream and pumps bytes
//! both ways until the flow ends.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{split, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::copy::{stats_copy, Direction, DEFAULT_BUFFER_SIZE};
use super::traits::{resolve_destination, FlowStream, UpstreamDialer, VirtualTcpConn};
use crate::config::TcpConfig;
use crate::error::DialError;
use crate::fakedns::FakeDnsEngine;
use crate::proc::{platform_resolver, resolve_or_unknown, ProcessResolver, UNKNOWN_PROCESS};
use crate::session::{FlowKey, Network, Session, SessionRegistry};

/// Default outbound tag recorded for proxied flows
pub const DEFAULT_OUTBOUND_TAG: &str = "proxy";

/// Relays virtual TCP flows to the upstream
#[derive(Clone)]
pub struct TcpRelayHandler {
    dialer: Arc<dyn UpstreamDialer>,
    fake_dns: Option<Arc<FakeDnsEngine>>,
    sessions: Option<Arc<SessionRegistry>>,
    process_resolver: Arc<dyn ProcessResolver>,
    buffer_size: usize,
    outbound_tag: String,
}

impl TcpRelayHandler {
    /// Create a handler dialing through `dialer`
    pub fn new(dialer: Arc<dyn UpstreamDialer>) -> Self {
        Self {
            dialer,
            fake_dns: None,
            sessions: None,
            process_resolver: platform_resolver(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            outbound_tag: DEFAULT_OUTBOUND_TAG.to_string(),
        }
    }

    /// Map fake destinations through `engine`
    #[must_use]
    pub fn with_fake_dns(mut self, engine: Arc<FakeDnsEngine>) -> Self {
        self.fake_dns = Some(engine);
        self
    }

    /// Track flows in `registry`
    #[must_use]
    pub fn with_sessions(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(registry);
        self
    }

    /// Attribute flows with `resolver`
    #[must_use]
    pub fn with_process_resolver(mut self, resolver: Arc<dyn ProcessResolver>) -> Self {
        self.process_resolver = resolver;
        self
    }

    /// Set the copy buffer size per direction
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the outbound tag recorded in sessions and access logs
    #[must_use]
    pub fn with_outbound_tag(mut self, tag: impl Into<String>) -> Self {
        self.outbound_tag = tag.into();
        self
    }

    /// Apply the `tcp` configuration section
    #[must_use]
    pub fn with_config(self, config: &TcpConfig) -> Self {
        self.with_buffer_size(config.buffer_size)
    }

    /// Dial the upstream for `conn` and start relaying in the background
    ///
    /// The returned handle completes once both directions are done and the
    /// session has been retired.
    ///
    /// # Errors
    ///
    /// Returns the dial error; the flow is dropped and no session is recorded.
    pub async fn handle<C>(&self, conn: C, target: SocketAddr) -> Result<JoinHandle<()>, DialError>
    where
        C: VirtualTcpConn,
    {
        let local = conn.local_addr();
        let destination = resolve_destination(self.fake_dns.as_deref(), target);

        let upstream = match self.dialer.dial_tcp(&destination).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("failed to dial upstream {} for {}: {}", destination, local, e);
                return Err(e);
            }
        };

        let processes = self.attribute(local).await;
        let key = FlowKey::tcp(local);
        let session = self.sessions.as_ref().map(|registry| {
            let session = Arc::new(
                Session::new(processes.clone(), Network::Tcp, local, &destination)
                    .with_outbound_tag(self.outbound_tag.clone()),
            );
            registry.add_session(key, Arc::clone(&session));
            session
        });

        let relay = relay(
            conn,
            upstream,
            session,
            self.sessions.clone(),
            key,
            self.buffer_size,
        );
        let handle = tokio::spawn(relay);

        info!(
            target: "access",
            process = %processes.first().map_or(UNKNOWN_PROCESS, String::as_str),
            outbound = %self.outbound_tag,
            network = "tcp",
            local = %local,
            remote = %destination,
            "accepted"
        );
        Ok(handle)
    }

    async fn attribute(&self, local: SocketAddr) -> Vec<String> {
        let resolver = Arc::clone(&self.process_resolver);
        tokio::task::spawn_blocking(move || resolve_or_unknown(&*resolver, Network::Tcp, local))
            .await
            .unwrap_or_else(|_| vec![UNKNOWN_PROCESS.to_string()])
    }
}

/// Pump both directions, then retire the session
///
/// Uplink runs on its own task, downlink inline. A direction that ends
/// cleanly shuts down only its own writer when both ends can half-close;
/// otherwise it interrupts the whole flow.
async fn relay<C>(
    conn: C,
    upstream: Box<dyn FlowStream>,
    session: Option<Arc<Session>>,
    sessions: Option<Arc<SessionRegistry>>,
    key: FlowKey,
    buffer_size: usize,
) where
    C: VirtualTcpConn,
{
    let half_close = conn.supports_half_close() && upstream.supports_half_close();
    let interrupt = CancellationToken::new();

    let (mut local_rd, mut local_wr) = split(conn);
    let (mut remote_rd, mut remote_wr) = split(upstream);

    let uplink = {
        let session = session.clone();
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            let result = stats_copy(
                &mut local_rd,
                &mut remote_wr,
                session.as_deref(),
                Direction::Uplink,
                &interrupt,
                buffer_size,
            )
            .await;
            finish(Direction::Uplink, result, &mut remote_wr, half_close, &interrupt).await;
        })
    };

    let result = stats_copy(
        &mut remote_rd,
        &mut local_wr,
        session.as_deref(),
        Direction::Downlink,
        &interrupt,
        buffer_size,
    )
    .await;
    finish(Direction::Downlink, result, &mut local_wr, half_close, &interrupt).await;

    if let Err(e) = uplink.await {
        warn!("uplink task for {} failed: {}", key, e);
    }

    if let Some(registry) = sessions {
        registry.remove_session(&key);
    }
    debug!("tcp flow {} finished", key);
}

async fn finish<W>(
    direction: Direction,
    result: std::io::Result<u64>,
    writer: &mut W,
    half_close: bool,
    interrupt: &CancellationToken,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    match result {
        Ok(n) => {
            debug!("{} finished after {} bytes", direction, n);
            if !half_close {
                interrupt.cancel();
            }
        }
        Err(e) => {
            if e.kind() != std::io::ErrorKind::ConnectionAborted || !interrupt.is_cancelled() {
                warn!("{} error: {}", direction, e);
            }
            interrupt.cancel();
        }
    }
    if let Err(e) = writer.shutdown().await {
        trace!("{} shutdown: {}", direction, e);
    }
}
