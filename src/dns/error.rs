//! Error types for the DNS cache and fallback resolver
//!
//! # Example
//!
//! ```
//! use flowbridge::dns::DnsError;
//!
//! let err = DnsError::timeout("query to 8.8.8.8:53", std::time::Duration::from_secs(5));
//! assert!(err.is_recoverable());
//! assert!(err.to_string().contains("timed out"));
//! ```

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Error types for DNS operations
#[derive(Debug, Error)]
pub enum DnsError {
    /// DNS message parsing failed
    #[error("Failed to parse DNS message: {reason}")]
    ParseError {
        /// Description of what went wrong during parsing
        reason: String,
    },

    /// DNS message serialization failed
    #[error("Failed to serialize DNS message: {reason}")]
    SerializeError {
        /// Description of what went wrong during serialization
        reason: String,
    },

    /// Network I/O error
    #[error("Network error: {reason}")]
    NetworkError {
        /// Description of the network failure
        reason: String,
        /// The underlying I/O error, if available
        #[source]
        source: Option<io::Error>,
    },

    /// Query timeout
    #[error("DNS query timed out after {timeout:?}: {context}")]
    TimeoutError {
        /// Description of what timed out
        context: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// Upstream server returned an unusable answer
    #[error("Upstream server error ({upstream}): {reason}")]
    UpstreamError {
        /// The upstream server address
        upstream: String,
        /// Description of the upstream failure
        reason: String,
    },

    /// No upstream DNS servers are configured
    #[error("No upstream DNS server available")]
    NoUpstream,

    /// Every configured server failed; carries the last failure
    #[error("Failed to resolve {domain}: {last}")]
    ResolutionError {
        /// The domain being resolved
        domain: String,
        /// The error reported by the last server tried
        #[source]
        last: Box<DnsError>,
    },
}

impl DnsError {
    /// Create a parse error
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::ParseError {
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialize(reason: impl Into<String>) -> Self {
        Self::SerializeError {
            reason: reason.into(),
        }
    }

    /// Create a network error from an I/O error
    pub fn network_io(reason: impl Into<String>, source: io::Error) -> Self {
        Self::NetworkError {
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Create a timeout error
    pub fn timeout(context: impl Into<String>, timeout: Duration) -> Self {
        Self::TimeoutError {
            context: context.into(),
            timeout,
        }
    }

    /// Create an upstream error
    pub fn upstream(upstream: impl ToString, reason: impl Into<String>) -> Self {
        Self::UpstreamError {
            upstream: upstream.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap the last server failure for `domain`
    pub fn resolution(domain: impl Into<String>, last: DnsError) -> Self {
        Self::ResolutionError {
            domain: domain.into(),
            last: Box::new(last),
        }
    }

    /// Check if this error is recoverable
    ///
    /// Timeouts and network failures may succeed on retry; malformed
    /// messages and missing configuration will not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::TimeoutError { .. } | Self::UpstreamError { .. } => {
                true
            }
            Self::ResolutionError { last, .. } => last.is_recoverable(),
            Self::ParseError { .. } | Self::SerializeError { .. } | Self::NoUpstream => false,
        }
    }
}

/// Result type for DNS operations
pub type DnsResult<T> = Result<T, DnsError>;
