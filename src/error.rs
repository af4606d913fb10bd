//! The error taxonomy of the crate.

use thiserror::Error;

/// Alias for results produced by this crate.
pub type Result<T, E = StompError> = std::result::Result<T, E>;

/// Everything that can go wrong while speaking STOMP.
#[derive(Debug, Error)]
pub enum StompError {
    /// A command or header combination is illegal for the negotiated
    /// version, or a server frame violates the session state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Bytes on the wire cannot be parsed as a frame. The parser must be
    /// reset before it can be fed again, and the connection is usually
    /// beyond saving since framing is lost.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A failover URI was rejected.
    #[error("malformed failover uri: {0}")]
    MalformedUri(String),

    /// CONNECTED was not received within the caller's window.
    #[error("timed out waiting for CONNECTED")]
    ConnectionTimeout,

    /// The transport closed unexpectedly.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The failover iterator is exhausted.
    #[error("no more brokers to try")]
    NoMoreBrokers,

    /// I/O failure in the transport adapter.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
