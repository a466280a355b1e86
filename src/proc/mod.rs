//! Process attribution
//!
//! Best-effort lookup of the process that owns the local end of a flow,
//! followed by its ancestors. Relays call this off the async runtime and
//! fall back to [`UNKNOWN_PROCESS`] on any failure.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::session::Network;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::ProcfsResolver;

/// Label used when the owning process cannot be determined
pub const UNKNOWN_PROCESS: &str = "unknown process";

/// Resolves the process chain owning a local socket
pub trait ProcessResolver: Send + Sync + fmt::Debug {
    /// Owning process first, then its ancestors up to (excluding) init
    ///
    /// # Errors
    ///
    /// Returns an error if no owning process can be found.
    fn resolve_owning_process_chain(
        &self,
        network: Network,
        local: SocketAddr,
    ) -> io::Result<Vec<String>>;
}

/// Resolver for platforms without an attribution backend
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProcessResolver;

impl ProcessResolver for NoopProcessResolver {
    fn resolve_owning_process_chain(
        &self,
        _network: Network,
        _local: SocketAddr,
    ) -> io::Result<Vec<String>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process attribution is not supported on this platform",
        ))
    }
}

/// The attribution backend of the current platform
#[must_use]
pub fn platform_resolver() -> Arc<dyn ProcessResolver> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ProcfsResolver::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(NoopProcessResolver)
    }
}

/// Resolve the chain, substituting the sentinel label on failure
pub fn resolve_or_unknown(
    resolver: &dyn ProcessResolver,
    network: Network,
    local: SocketAddr,
) -> Vec<String> {
    match resolver.resolve_owning_process_chain(network, local) {
        Ok(chain) if !chain.is_empty() => chain,
        Ok(_) => vec![UNKNOWN_PROCESS.to_string()],
        Err(e) => {
            tracing::trace!(%network, %local, error = %e, "process attribution failed");
            vec![UNKNOWN_PROCESS.to_string()]
        }
    }
}
