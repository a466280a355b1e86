//! Error types for flowbridge
//!
//! This module defines the crate-level error hierarchy. Subsystems with a
//! richer taxonomy keep their own error enum next to the code that raises it
//! ([`FakeDnsError`](crate::fakedns::FakeDnsError),
//! [`DnsError`](crate::dns::DnsError)); everything converges into
//! [`FlowBridgeError`].

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::dns::DnsError;
use crate::fakedns::{FakeDnsError, PersistenceError};

/// Top-level error type for flowbridge
#[derive(Debug, Error)]
pub enum FlowBridgeError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Fake-DNS synthesis errors
    #[error("Fake DNS error: {0}")]
    FakeDns(#[from] FakeDnsError),

    /// Fake-DNS cache file errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Fallback resolver errors
    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),

    /// Upstream dial errors
    #[error("Dial error: {0}")]
    Dial(#[from] DialError),

    /// Per-flow relay errors
    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FlowBridgeError {
    /// Check if this error is recoverable (the next flow may succeed)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Persistence(_) => false,
            Self::FakeDns(_) => true,
            Self::Dns(e) => e.is_recoverable(),
            Self::Dial(e) => e.is_recoverable(),
            Self::Flow(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

/// Upstream dial errors
///
/// Dialing is never retried; a failed dial drops the one flow.
#[derive(Debug, Error)]
pub enum DialError {
    /// The upstream refused or could not reach the destination
    #[error("Failed to dial {destination}: {reason}")]
    ConnectionFailed { destination: String, reason: String },

    /// A domain destination could not be turned into an address
    #[error("Failed to resolve {domain}: {reason}")]
    Resolution { domain: String, reason: String },

    /// I/O error while dialing
    #[error("Dial I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl DialError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Resolution { .. } => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(destination: impl ToString, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            destination: destination.to_string(),
            reason: reason.into(),
        }
    }
}

/// Per-flow relay errors
#[derive(Debug, Error)]
pub enum FlowError {
    /// Operation against an unknown or already closed flow
    #[error("proxy connection {local}->{remote} does not exist")]
    NotFound { local: SocketAddr, remote: SocketAddr },

    /// Upstream dial failed while opening the flow
    #[error("dial upstream failed: {0}")]
    Dial(#[from] DialError),

    /// Writing the synthesized DNS answer back to the client failed
    #[error("write dns answer failed: {0}")]
    DnsAnswer(io::Error),

    /// Writing to the upstream failed
    #[error("write remote failed: {0}")]
    WriteRemote(io::Error),

    /// I/O error
    #[error("Flow I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl FlowError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::DnsAnswer(_) | Self::WriteRemote(_) => false,
            Self::Dial(e) => e.is_recoverable(),
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ),
        }
    }

    /// Create a flow-not-found error
    pub const fn not_found(local: SocketAddr, remote: SocketAddr) -> Self {
        Self::NotFound { local, remote }
    }
}

/// Type alias for Result with FlowBridgeError
pub type Result<T> = std::result::Result<T, FlowBridgeError>;
