//! Transport error types.

use thiserror::Error;

/// Errors from socket operations and STUN discovery.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket could not be bound
    #[error("Failed to bind UDP socket: {0}")]
    Bind(std::io::Error),

    /// Send or receive failed at the OS level
    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down
    #[error("Transport closed")]
    Closed,

    /// STUN discovery failed (timeout, bad server, or malformed response)
    #[error("STUN discovery failed: {0}")]
    StunFailed(String),
}
