//! DNS query admission
//!
//! Decides whether a raw DNS payload is something the engine may answer:
//! exactly one question, class IN, type A or AAAA, and a non-empty domain
//! that renders without escapes, separators or whitespace.

use std::fmt;

use hickory_proto::op::Message;
use hickory_proto::rr::{DNSClass, RecordType};

use super::error::{FakeDnsError, FakeDnsResult};

/// Record type of an admissible query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// IPv4 address query
    A,
    /// IPv6 address query
    Aaaa,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "TypeA"),
            Self::Aaaa => write!(f, "TypeAAAA"),
        }
    }
}

/// A parsed, admissible DNS query
#[derive(Debug, Clone)]
pub struct DnsQuery {
    /// The full request message
    pub message: Message,
    /// Queried record type
    pub kind: QueryKind,
    /// Queried domain without the trailing dot
    pub domain: String,
}

/// Parse a raw payload into an admissible query
///
/// # Errors
///
/// Returns a `FakeDnsError` describing why the payload is not admissible.
pub fn parse_dns_query(data: &[u8]) -> FakeDnsResult<DnsQuery> {
    let message =
        Message::from_vec(data).map_err(|e| FakeDnsError::Unparsable(e.to_string()))?;

    let queries = message.queries();
    if queries.len() != 1 {
        return Err(FakeDnsError::MultipleQuestions(queries.len()));
    }
    let query = &queries[0];

    let kind = match query.query_type() {
        RecordType::A => QueryKind::A,
        RecordType::AAAA => QueryKind::Aaaa,
        other => return Err(FakeDnsError::UnsupportedType(other)),
    };

    if query.query_class() != DNSClass::IN {
        return Err(FakeDnsError::UnsupportedClass(query.query_class()));
    }

    let fqdn = query.name().to_string();
    let domain = fqdn.strip_suffix('.').unwrap_or(&fqdn).to_string();
    if !is_domain_name(&domain) {
        return Err(FakeDnsError::InvalidDomain(fqdn));
    }

    Ok(DnsQuery {
        message,
        kind,
        domain,
    })
}

/// Rendered name is usable as a binding: escaped labels, commas and
/// whitespace would not survive the cache file.
fn is_domain_name(domain: &str) -> bool {
    !domain.is_empty()
        && !domain
            .chars()
            .any(|c| c == ',' || c == '\\' || c.is_whitespace() || c.is_control())
}
