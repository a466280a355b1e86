//! One-direction copy with session accounting
//!
//! Each relay direction runs one [`stats_copy`] loop. The loops share an
//! interrupt token: a direction that fails, or that cannot half-close, fires
//! it so the opposite loop stops too.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::session::Session;

/// Default copy buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Direction of a relay loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Virtual interface to upstream
    Uplink,
    /// Upstream to virtual interface
    Downlink,
}

impl Direction {
    fn record(self, session: &Session, n: u64) {
        match self {
            Self::Uplink => session.add_upload_bytes(n),
            Self::Downlink => session.add_download_bytes(n),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uplink => write!(f, "uplink"),
            Self::Downlink => write!(f, "downlink"),
        }
    }
}

/// Copy `reader` into `writer` until end of stream
///
/// Bytes are credited to `session` as they are written. Returns the number
/// of bytes copied, or an error if either side fails or `interrupt` fires.
pub async fn stats_copy<R, W>(
    reader: &mut R,
    writer: &mut W,
    session: Option<&Session>,
    direction: Direction,
    interrupt: &CancellationToken,
    buffer_size: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut written = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            () = interrupt.cancelled() => {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "relay interrupted"));
            }
            r = reader.read(&mut buf) => r?,
        };
        if n == 0 {
            return Ok(written);
        }

        tokio::select! {
            biased;
            () = interrupt.cancelled() => {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "relay interrupted"));
            }
            r = writer.write_all(&buf[..n]) => r?,
        }
        writer.flush().await?;

        if let Some(session) = session {
            direction.record(session, n as u64);
        }
        written += n as u64;
    }
}
