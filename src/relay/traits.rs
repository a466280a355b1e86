//! Relay seams
//!
//! The virtual interface hands the relays [`VirtualTcpConn`] and
//! [`VirtualUdpConn`] endpoints; the proxy backend is reached through an
//! [`UpstreamDialer`]. Both sides are traits so the packet stack and the
//! backend can be swapped without touching the relay logic.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

use crate::error::DialError;
use crate::fakedns::FakeDnsEngine;

/// A bidirectional byte stream taking part in a relay
pub trait FlowStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Whether each direction can be shut down independently
    ///
    /// Streams without this capability are torn down as a whole as soon as
    /// either direction ends.
    fn supports_half_close(&self) -> bool {
        false
    }
}

impl FlowStream for TcpStream {
    fn supports_half_close(&self) -> bool {
        true
    }
}

impl FlowStream for DuplexStream {
    fn supports_half_close(&self) -> bool {
        true
    }
}

impl<T: FlowStream + ?Sized> FlowStream for Box<T> {
    fn supports_half_close(&self) -> bool {
        (**self).supports_half_close()
    }
}

/// A TCP flow accepted on the virtual interface
pub trait VirtualTcpConn: FlowStream {
    /// Local (application-side) address of the flow
    fn local_addr(&self) -> SocketAddr;
}

/// A UDP "socket" on the virtual interface
#[async_trait]
pub trait VirtualUdpConn: Send + Sync {
    /// Local (application-side) address of the flow
    fn local_addr(&self) -> SocketAddr;

    /// Deliver a datagram to the application as if sent from `from`
    async fn write_from(&self, data: &[u8], from: SocketAddr) -> io::Result<usize>;

    /// Release the virtual socket
    fn close(&self);
}

/// Destination handed to the upstream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    /// Literal address
    Ip(SocketAddr),
    /// Domain name and port, resolved by the upstream
    Domain(String, u16),
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(domain, port) => write!(f, "{domain}:{port}"),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::Ip(addr)
    }
}

/// An upstream datagram socket
#[async_trait]
pub trait UpstreamDatagram: Send + Sync {
    /// Send one datagram to `target`
    async fn send_to(&self, data: &[u8], target: &TargetAddr) -> io::Result<usize>;

    /// Receive one datagram
    ///
    /// Returns an error once the socket is closed.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Close the socket, failing pending and future receives
    fn close(&self);
}

/// Opens upstream connections through the proxy backend
#[async_trait]
pub trait UpstreamDialer: Send + Sync {
    /// Open a stream to `target`
    ///
    /// # Errors
    ///
    /// Returns `DialError` if the upstream is unreachable or rejects the target.
    async fn dial_tcp(&self, target: &TargetAddr) -> Result<Box<dyn FlowStream>, DialError>;

    /// Open a datagram socket
    ///
    /// # Errors
    ///
    /// Returns `DialError` if the socket cannot be created.
    async fn dial_udp(&self) -> Result<Arc<dyn UpstreamDatagram>, DialError>;
}

/// Pick the destination to dial for a flow addressed to `addr`
///
/// Fake addresses are replaced by the domain they stand for; a fake address
/// with no binding is dialed literally.
#[must_use]
pub fn resolve_destination(fake_dns: Option<&FakeDnsEngine>, addr: SocketAddr) -> TargetAddr {
    let ip: IpAddr = addr.ip();
    match fake_dns {
        Some(engine) if engine.is_fake_ip(ip) => match engine.query_domain(ip) {
            Some(domain) => TargetAddr::Domain(domain, addr.port()),
            None => {
                tracing::debug!("fake ip {} has no bound domain, dialing literally", ip);
                TargetAddr::Ip(addr)
            }
        },
        _ => TargetAddr::Ip(addr),
    }
}
