//! Session tracking
//!
//! Flow metadata for reporting: who opened a flow, where it goes and how
//! many bytes moved each way.

pub mod record;
pub mod registry;

pub use record::{FlowKey, Network, Session, SessionSnapshot, CHAIN_SEPARATOR};
pub use registry::{SessionRegistry, SessionReport, DEFAULT_MAX_COMPLETED};
