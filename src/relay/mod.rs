//! Flow relays
//!
//! Terminates flows from the virtual interface and bridges them to the
//! upstream:
//!
//! - [`TcpRelayHandler`]: one upstream stream per flow, half-close aware
//! - [`UdpRelayHandler`]: one upstream datagram socket per flow, with DNS
//!   interception and inactivity expiry
//!
//! Both consult the Fake-DNS engine so that flows towards synthetic
//! addresses are dialed by domain.

pub mod copy;
pub mod direct;
pub mod idle;
pub mod tcp;
pub mod traits;
pub mod udp;

pub use copy::{stats_copy, Direction, DEFAULT_BUFFER_SIZE};
pub use direct::{DirectDialer, ResolvingDialer, DEFAULT_CONNECT_TIMEOUT};
pub use idle::ActivityTimer;
pub use tcp::{TcpRelayHandler, DEFAULT_OUTBOUND_TAG};
pub use traits::{
    resolve_destination, FlowStream, TargetAddr, UpstreamDatagram, UpstreamDialer,
    VirtualTcpConn, VirtualUdpConn,
};
pub use udp::{UdpRelayHandler, UdpRelayHandlerBuilder, DEFAULT_DNS_TIMEOUT, DEFAULT_UDP_TIMEOUT};
