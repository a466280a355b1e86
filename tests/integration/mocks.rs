//! Test doubles for the virtual interface and the proxy backend
//!
//! - `MockTcpConn`: a virtual TCP flow backed by one end of a duplex pipe
//! - `MockUdpConn`: a virtual UDP socket recording what is written back
//! - `MockDialer`: hands out duplex pipes and channel-backed datagram
//!   sockets, recording every destination it is asked for
//! - `ResettingStream`: an upstream whose reads fail with `ConnectionReset`

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RecordType};
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use flowbridge::error::DialError;
use flowbridge::relay::{
    FlowStream, TargetAddr, UpstreamDatagram, UpstreamDialer, VirtualTcpConn, VirtualUdpConn,
};

/// Build a single-question DNS query
pub fn dns_query(domain: &str, qtype: RecordType, id: u16) -> Vec<u8> {
    let mut req = Message::new();
    req.set_id(id);
    req.set_message_type(MessageType::Query);
    req.set_op_code(OpCode::Query);
    req.set_recursion_desired(true);
    req.add_query(Query::query(Name::from_str(domain).unwrap(), qtype));
    req.to_vec().unwrap()
}

/// Pull the first address out of an A/AAAA answer
pub fn answer_ip(response: &[u8]) -> std::net::IpAddr {
    let message = Message::from_vec(response).unwrap();
    let record = message.answers().first().expect("answer record");
    match record.data() {
        Some(hickory_proto::rr::RData::A(a)) => std::net::IpAddr::V4(a.0),
        Some(hickory_proto::rr::RData::AAAA(aaaa)) => std::net::IpAddr::V6(aaaa.0),
        other => panic!("unexpected answer {other:?}"),
    }
}

// ============================================================================
// Virtual TCP flow
// ============================================================================

pub struct MockTcpConn {
    stream: DuplexStream,
    local: SocketAddr,
    half_close: bool,
}

impl MockTcpConn {
    /// Returns the flow and the application's end of the pipe
    pub fn pair(local: SocketAddr, half_close: bool) -> (Self, DuplexStream) {
        let (app, stream) = duplex(64 * 1024);
        (
            Self {
                stream,
                local,
                half_close,
            },
            app,
        )
    }
}

impl AsyncRead for MockTcpConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockTcpConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl FlowStream for MockTcpConn {
    fn supports_half_close(&self) -> bool {
        self.half_close
    }
}

impl VirtualTcpConn for MockTcpConn {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

// ============================================================================
// Virtual UDP socket
// ============================================================================

pub struct MockUdpConn {
    local: SocketAddr,
    written: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    closed: AtomicBool,
}

impl MockUdpConn {
    /// Returns the socket and a receiver of datagrams delivered to the app
    pub fn new(local: SocketAddr) -> (Arc<Self>, mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                local,
                written: tx,
                closed: AtomicBool::new(false),
            }),
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VirtualUdpConn for MockUdpConn {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn write_from(&self, data: &[u8], from: SocketAddr) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        self.written
            .send((data.to_vec(), from))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"))?;
        Ok(data.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Upstream
// ============================================================================

/// Backend-side handle of one upstream datagram socket
pub struct DatagramPeer {
    /// Datagrams the relay sent upstream
    pub sent: mpsc::UnboundedReceiver<(Vec<u8>, TargetAddr)>,
    /// Inject datagrams for the relay to receive
    pub inject: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    pub closed: CancellationToken,
}

struct MockDatagram {
    sent: mpsc::UnboundedSender<(Vec<u8>, TargetAddr)>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    closed: CancellationToken,
}

#[async_trait]
impl UpstreamDatagram for MockDatagram {
    async fn send_to(&self, data: &[u8], target: &TargetAddr) -> io::Result<usize> {
        if self.closed.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        self.sent
            .send((data.to_vec(), target.clone()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))?;
        Ok(data.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            () = self.closed.cancelled() => {
                Err(io::Error::new(io::ErrorKind::NotConnected, "closed"))
            }
            msg = inbound.recv() => match msg {
                Some((data, from)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok((n, from))
                }
                None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer dropped")),
            },
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Upstream stream whose reads fail; writes go to the pipe
pub struct ResettingStream {
    inner: DuplexStream,
}

impl AsyncRead for ResettingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset by peer",
        )))
    }
}

impl AsyncWrite for ResettingStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl FlowStream for ResettingStream {
    fn supports_half_close(&self) -> bool {
        true
    }
}

/// Dialer recording every destination and handing the backend ends to the test
pub struct MockDialer {
    pub dialed: Mutex<Vec<TargetAddr>>,
    fail: AtomicBool,
    reset: AtomicBool,
    tcp_peers: mpsc::UnboundedSender<DuplexStream>,
    udp_peers: mpsc::UnboundedSender<DatagramPeer>,
}

pub struct DialerHandles {
    pub tcp_peers: mpsc::UnboundedReceiver<DuplexStream>,
    pub udp_peers: mpsc::UnboundedReceiver<DatagramPeer>,
}

impl MockDialer {
    pub fn new() -> (Arc<Self>, DialerHandles) {
        let (tcp_tx, tcp_rx) = mpsc::unbounded_channel();
        let (udp_tx, udp_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                dialed: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                reset: AtomicBool::new(false),
                tcp_peers: tcp_tx,
                udp_peers: udp_tx,
            }),
            DialerHandles {
                tcp_peers: tcp_rx,
                udp_peers: udp_rx,
            },
        )
    }

    pub fn failing() -> (Arc<Self>, DialerHandles) {
        let (dialer, handles) = Self::new();
        dialer.fail.store(true, Ordering::SeqCst);
        (dialer, handles)
    }

    /// TCP upstreams fail every read with `ConnectionReset`
    pub fn resetting() -> (Arc<Self>, DialerHandles) {
        let (dialer, handles) = Self::new();
        dialer.reset.store(true, Ordering::SeqCst);
        (dialer, handles)
    }

    pub fn dialed(&self) -> Vec<TargetAddr> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl UpstreamDialer for MockDialer {
    async fn dial_tcp(&self, target: &TargetAddr) -> Result<Box<dyn FlowStream>, DialError> {
        self.dialed.lock().push(target.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DialError::connection_failed(target, "refused by mock"));
        }
        let (relay_end, backend_end) = duplex(64 * 1024);
        let _ = self.tcp_peers.send(backend_end);
        if self.reset.load(Ordering::SeqCst) {
            return Ok(Box::new(ResettingStream { inner: relay_end }));
        }
        Ok(Box::new(relay_end))
    }

    async fn dial_udp(&self) -> Result<Arc<dyn UpstreamDatagram>, DialError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DialError::connection_failed("udp", "refused by mock"));
        }
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let _ = self.udp_peers.send(DatagramPeer {
            sent: sent_rx,
            inject: inject_tx,
            closed: closed.clone(),
        });
        Ok(Arc::new(MockDatagram {
            sent: sent_tx,
            inbound: tokio::sync::Mutex::new(inject_rx),
            closed,
        }))
    }
}
