//! Per-flow session records
//!
//! A [`Session`] is created when a flow is accepted and shared between the
//! relay tasks that update its byte counters. When the flow ends the registry
//! freezes it into a [`SessionSnapshot`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Separator used when rendering a process chain
pub const CHAIN_SEPARATOR: &str = " ↣ ";

/// Transport of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// TCP stream
    Tcp,
    /// UDP datagrams
    Udp,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Identity of a flow on the virtual interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// Transport
    pub network: Network,
    /// Local (virtual-side) address of the flow
    pub local: SocketAddr,
}

impl FlowKey {
    /// Key of a TCP flow
    #[must_use]
    pub const fn tcp(local: SocketAddr) -> Self {
        Self {
            network: Network::Tcp,
            local,
        }
    }

    /// Key of a UDP flow
    #[must_use]
    pub const fn udp(local: SocketAddr) -> Self {
        Self {
            network: Network::Udp,
            local,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, self.local)
    }
}

/// Live metadata of one flow
#[derive(Debug)]
pub struct Session {
    /// Owning process first, then its ancestors
    processes: Vec<String>,
    network: Network,
    local_addr: String,
    remote_addr: String,
    upload_bytes: AtomicU64,
    download_bytes: AtomicU64,
    start: SystemTime,
    first_response: OnceLock<SystemTime>,
    extra: Mutex<String>,
    outbound_tag: String,
}

impl Session {
    /// Create a session starting now
    #[must_use]
    pub fn new(
        processes: Vec<String>,
        network: Network,
        local_addr: impl ToString,
        remote_addr: impl ToString,
    ) -> Self {
        Self {
            processes,
            network,
            local_addr: local_addr.to_string(),
            remote_addr: remote_addr.to_string(),
            upload_bytes: AtomicU64::new(0),
            download_bytes: AtomicU64::new(0),
            start: SystemTime::now(),
            first_response: OnceLock::new(),
            extra: Mutex::new(String::new()),
            outbound_tag: String::new(),
        }
    }

    /// Set the outbound tag
    #[must_use]
    pub fn with_outbound_tag(mut self, tag: impl Into<String>) -> Self {
        self.outbound_tag = tag.into();
        self
    }

    /// Count bytes sent towards the upstream
    pub fn add_upload_bytes(&self, n: u64) {
        self.upload_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Count bytes received from the upstream; the first call marks the
    /// first-response time
    pub fn add_download_bytes(&self, n: u64) {
        let _ = self.first_response.set(SystemTime::now());
        self.download_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Replace the free-form extra tag
    pub fn set_extra(&self, extra: impl Into<String>) {
        *self.extra.lock() = extra.into();
    }

    /// Bytes uploaded so far
    #[must_use]
    pub fn upload_bytes(&self) -> u64 {
        self.upload_bytes.load(Ordering::Relaxed)
    }

    /// Bytes downloaded so far
    #[must_use]
    pub fn download_bytes(&self) -> u64 {
        self.download_bytes.load(Ordering::Relaxed)
    }

    /// Transport of the flow
    #[must_use]
    pub fn network(&self) -> Network {
        self.network
    }

    /// Start time
    #[must_use]
    pub fn start(&self) -> SystemTime {
        self.start
    }

    /// Outbound tag
    #[must_use]
    pub fn outbound_tag(&self) -> &str {
        &self.outbound_tag
    }

    /// Current extra tag
    #[must_use]
    pub fn extra(&self) -> String {
        self.extra.lock().clone()
    }

    /// Process chain rendered root-first, e.g. `init ↣ bash ↣ curl`
    #[must_use]
    pub fn process_chain(&self) -> String {
        render_chain(&self.processes)
    }

    /// Copy the current state, with `end` as the end time if the flow is over
    #[must_use]
    pub fn snapshot(&self, end: Option<SystemTime>) -> SessionSnapshot {
        let first_response = self.first_response.get().copied();
        let first_chunk_duration_ms = first_response
            .and_then(|t| t.duration_since(self.start).ok())
            .map(|d| d.as_millis() as u64);

        SessionSnapshot {
            process_chain: self.process_chain(),
            processes: self.processes.clone(),
            network: self.network,
            local_addr: self.local_addr.clone(),
            remote_addr: self.remote_addr.clone(),
            upload_bytes: self.upload_bytes(),
            download_bytes: self.download_bytes(),
            start_ms: epoch_millis(self.start),
            end_ms: end.map(epoch_millis),
            first_response_ms: first_response.map(epoch_millis),
            first_chunk_duration_ms,
            extra: self.extra(),
            outbound_tag: self.outbound_tag.clone(),
        }
    }
}

/// Point-in-time copy of a session, as exposed by reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Rendered process chain
    pub process_chain: String,
    /// Owning process first, then its ancestors
    pub processes: Vec<String>,
    /// Transport
    pub network: Network,
    /// Local address
    pub local_addr: String,
    /// Remote address as dialed
    pub remote_addr: String,
    /// Bytes sent upstream
    pub upload_bytes: u64,
    /// Bytes received from upstream
    pub download_bytes: u64,
    /// Start, in milliseconds since the Unix epoch
    pub start_ms: u64,
    /// End, in milliseconds since the Unix epoch
    pub end_ms: Option<u64>,
    /// First downstream chunk, in milliseconds since the Unix epoch
    pub first_response_ms: Option<u64>,
    /// Time from start to first downstream chunk
    pub first_chunk_duration_ms: Option<u64>,
    /// Free-form tag, e.g. the queried domain of a DNS flow
    pub extra: String,
    /// Outbound tag
    pub outbound_tag: String,
}

fn render_chain(processes: &[String]) -> String {
    processes
        .iter()
        .rev()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(CHAIN_SEPARATOR)
}

fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
