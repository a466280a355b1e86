//! Built-in upstream dialers
//!
//! [`DirectDialer`] connects straight from the host with tokio sockets; it
//! stands in for a proxy backend when none is plugged in. [`ResolvingDialer`]
//! wraps another dialer and resolves domain destinations itself, for
//! backends that only accept literal addresses.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::traits::{FlowStream, TargetAddr, UpstreamDatagram, UpstreamDialer};
use crate::config::TcpConfig;
use crate::dns::Resolver;
use crate::error::DialError;

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials destinations directly from the host
#[derive(Debug, Clone)]
pub struct DirectDialer {
    connect_timeout: Duration,
    udp_bind: SocketAddr,
}

impl Default for DirectDialer {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            udp_bind: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}

impl DirectDialer {
    /// Create a direct dialer with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialer using the connect timeout of the `tcp` configuration section
    #[must_use]
    pub fn from_config(config: &TcpConfig) -> Self {
        Self::new().with_connect_timeout(config.connect_timeout())
    }

    /// Set the TCP connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Set the local address UDP sockets bind to
    #[must_use]
    pub fn with_udp_bind(mut self, addr: SocketAddr) -> Self {
        self.udp_bind = addr;
        self
    }
}

#[async_trait]
impl UpstreamDialer for DirectDialer {
    async fn dial_tcp(&self, target: &TargetAddr) -> Result<Box<dyn FlowStream>, DialError> {
        let connect = async {
            match target {
                TargetAddr::Ip(addr) => TcpStream::connect(addr).await,
                TargetAddr::Domain(domain, port) => TcpStream::connect((domain.as_str(), *port)).await,
            }
        };
        let stream = timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| DialError::connection_failed(target, "connect timed out"))?
            .map_err(|e| DialError::connection_failed(target, e.to_string()))?;
        // Relays are latency sensitive
        let _ = stream.set_nodelay(true);
        debug!("direct tcp connected to {}", target);
        Ok(Box::new(stream))
    }

    async fn dial_udp(&self) -> Result<Arc<dyn UpstreamDatagram>, DialError> {
        let socket = UdpSocket::bind(self.udp_bind).await?;
        Ok(Arc::new(DirectDatagram {
            socket,
            closed: CancellationToken::new(),
        }))
    }
}

/// Host UDP socket
#[derive(Debug)]
struct DirectDatagram {
    socket: UdpSocket,
    closed: CancellationToken,
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "datagram socket closed")
}

#[async_trait]
impl UpstreamDatagram for DirectDatagram {
    async fn send_to(&self, data: &[u8], target: &TargetAddr) -> io::Result<usize> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        match target {
            TargetAddr::Ip(addr) => self.socket.send_to(data, addr).await,
            TargetAddr::Domain(domain, port) => {
                self.socket.send_to(data, (domain.as_str(), *port)).await
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        tokio::select! {
            () = self.closed.cancelled() => Err(closed_error()),
            r = self.socket.recv_from(buf) => r,
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Resolves domain destinations before handing them to an inner dialer
pub struct ResolvingDialer {
    inner: Arc<dyn UpstreamDialer>,
    resolver: Arc<Resolver>,
}

impl ResolvingDialer {
    /// Wrap `inner`, resolving through `resolver`
    pub fn new(inner: Arc<dyn UpstreamDialer>, resolver: Arc<Resolver>) -> Self {
        Self { inner, resolver }
    }
}

/// Resolve `target` to a literal address, picking one answer at random
async fn resolve_target(resolver: &Resolver, target: &TargetAddr) -> Result<TargetAddr, DialError> {
    match target {
        TargetAddr::Ip(_) => Ok(target.clone()),
        TargetAddr::Domain(domain, port) => {
            let ips = resolver
                .resolve(domain)
                .await
                .map_err(|e| DialError::Resolution {
                    domain: domain.clone(),
                    reason: e.to_string(),
                })?;
            let ip: IpAddr = *ips.choose(&mut rand::thread_rng()).ok_or_else(|| {
                DialError::Resolution {
                    domain: domain.clone(),
                    reason: "no addresses".into(),
                }
            })?;
            debug!("resolved {} to {}", domain, ip);
            Ok(TargetAddr::Ip(SocketAddr::new(ip, *port)))
        }
    }
}

#[async_trait]
impl UpstreamDialer for ResolvingDialer {
    async fn dial_tcp(&self, target: &TargetAddr) -> Result<Box<dyn FlowStream>, DialError> {
        let target = resolve_target(&self.resolver, target).await?;
        self.inner.dial_tcp(&target).await
    }

    async fn dial_udp(&self) -> Result<Arc<dyn UpstreamDatagram>, DialError> {
        let inner = self.inner.dial_udp().await?;
        Ok(Arc::new(ResolvingDatagram {
            inner,
            resolver: Arc::clone(&self.resolver),
        }))
    }
}

struct ResolvingDatagram {
    inner: Arc<dyn UpstreamDatagram>,
    resolver: Arc<Resolver>,
}

#[async_trait]
impl UpstreamDatagram for ResolvingDatagram {
    async fn send_to(&self, data: &[u8], target: &TargetAddr) -> io::Result<usize> {
        let target = resolve_target(&self.resolver, target)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.inner.send_to(data, &target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn close(&self) {
        self.inner.close();
    }
}
