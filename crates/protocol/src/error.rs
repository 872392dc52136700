//! crates/protocol/src/error.rs
//!
//! Error taxonomy for framed reads and writes.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the framed connection I/O.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A read deadline expired before a full frame or chunk arrived.
    #[error("read deadline expired after {0:?}")]
    Timeout(Duration),
    /// The peer closed the connection at a frame boundary.
    #[error("connection closed by peer")]
    Closed,
    /// Transport failure on the socket.
    #[error("connection i/o failure: {0}")]
    Io(#[from] io::Error),
    /// A control frame could not be decoded.
    #[error("malformed message frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A payload accessor was called on a message without payload bytes.
    #[error("message carries no payload")]
    MissingPayload,
    /// A control frame exceeded the maximum allowed length.
    #[error("message frame exceeds {0} bytes")]
    Oversized(usize),
}

impl ProtocolError {
    /// Whether the error is the peer closing the connection, which callers
    /// treat as a graceful quit rather than a failure.
    #[must_use]
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, ProtocolError::Closed)
    }
}
