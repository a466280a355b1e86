//! Error types for the Fake-DNS engine

use std::io;
use std::net::Ipv4Addr;

use hickory_proto::rr::{DNSClass, RecordType};
use thiserror::Error;

/// Error type for Fake-DNS synthesis
///
/// Every variant except [`FakeDnsError::Encode`] means "this query is not
/// ours": the caller lets it fall through to normal resolution.
#[derive(Error, Debug)]
pub enum FakeDnsError {
    /// The payload is not a DNS message
    #[error("unparsable query: {0}")]
    Unparsable(String),

    /// Only single-question queries are synthesized
    #[error("cannot handle dns query: {0} questions")]
    MultipleQuestions(usize),

    /// Only A/AAAA queries are synthesized
    #[error("unhandled query type {0}")]
    UnsupportedType(RecordType),

    /// Only class IN queries are synthesized
    #[error("unhandled query class {0}")]
    UnsupportedClass(DNSClass),

    /// The question carries no usable domain
    #[error("invalid domain name: {0:?}")]
    InvalidDomain(String),

    /// The domain matched an exclusion filter
    #[error("domain {domain} excluded by filter {filter}")]
    Excluded { domain: String, filter: String },

    /// The configured range is empty
    #[error("invalid fake ip range {min} - {max}")]
    InvalidRange { min: Ipv4Addr, max: Ipv4Addr },

    /// The synthesized answer could not be packed
    #[error("failed to pack dns answer: {0}")]
    Encode(String),
}

/// Result type for Fake-DNS operations
pub type FakeDnsResult<T> = Result<T, FakeDnsError>;

/// Errors while loading or saving the Fake-DNS cache file
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Reading or writing the cache file failed
    #[error("fake dns cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// The cache file violates the line format
    #[error("invalid cache content at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

impl PersistenceError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line,
            reason: reason.into(),
        }
    }
}
