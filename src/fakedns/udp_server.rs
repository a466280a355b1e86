//! Fake-DNS UDP responder
//!
//! A standalone listener that answers admissible queries from the engine.
//! Everything else is forwarded verbatim to the fallback resolver when one
//! is configured, or answered with SERVFAIL.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, ResponseCode};
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{debug, error, trace};

use super::engine::FakeDnsEngine;
use crate::dns::Resolver;

/// Fake-DNS UDP server
pub struct FakeDnsUdpServer {
    socket: Arc<UdpSocket>,
    engine: Arc<FakeDnsEngine>,
    resolver: Option<Arc<Resolver>>,
}

impl FakeDnsUdpServer {
    /// Bind to the given address and create a new UDP server
    ///
    /// # Errors
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr, engine: Arc<FakeDnsEngine>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            engine,
            resolver: None,
        })
    }

    /// Forward non-synthesizable queries to `resolver`
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Get the local address of the server
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the UDP server loop
    ///
    /// # Errors
    /// Returns an error if the server encounters a fatal error.
    pub async fn run(self) -> io::Result<()> {
        let mut buffer = vec![0u8; 65535];

        loop {
            let (n, peer_addr) = match self.socket.recv_from(&mut buffer).await {
                Ok(r) => r,
                Err(err) => {
                    error!("FakeDNS UDP recv error: {}", err);
                    time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            trace!("FakeDNS UDP received {} bytes from {}", n, peer_addr);
            let request = &buffer[..n];

            match self.engine.generate_fake_response(request) {
                Ok(response) => {
                    if let Err(err) = self.socket.send_to(&response, peer_addr).await {
                        debug!("FakeDNS UDP send error to {}: {}", peer_addr, err);
                    }
                }
                Err(err) => {
                    trace!("FakeDNS passes query from {}: {}", peer_addr, err);
                    // Forwarding may take a full resolver timeout
                    tokio::spawn(forward(
                        Arc::clone(&self.socket),
                        self.resolver.clone(),
                        request.to_vec(),
                        peer_addr,
                    ));
                }
            }
        }
    }
}

async fn forward(
    socket: Arc<UdpSocket>,
    resolver: Option<Arc<Resolver>>,
    request: Vec<u8>,
    peer_addr: SocketAddr,
) {
    let response = match resolver {
        Some(resolver) => match resolver.exchange_raw(&request).await {
            Ok(response) => Some(response),
            Err(err) => {
                debug!("FakeDNS forward for {} failed: {}", peer_addr, err);
                servfail(&request)
            }
        },
        None => servfail(&request),
    };

    let Some(response) = response else {
        return;
    };
    if let Err(err) = socket.send_to(&response, peer_addr).await {
        debug!("FakeDNS UDP send error to {}: {}", peer_addr, err);
    }
}

/// SERVFAIL reply for a parsable request; unparsable ones are dropped
fn servfail(request: &[u8]) -> Option<Vec<u8>> {
    let request = Message::from_vec(request).ok()?;
    let mut response =
        Message::error_msg(request.id(), request.op_code(), ResponseCode::ServFail);
    for query in request.queries() {
        response.add_query(query.clone());
    }
    response.to_vec().ok()
}
