//! Node error types.
//!
//! Recovered locally (drop + counter, never surfaced): malformed
//! envelopes, checksum mismatches, rate-limited datagrams, duplicates,
//! STUN failure (falls back to the interface address). Everything below
//! reaches the caller. `Internal` is the only fatal kind.

use thiserror::Error;

/// Errors surfaced through the node's public API.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Datagram could not be parsed as an envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope checksum did not match its content
    #[error("Envelope checksum mismatch")]
    ChecksumMismatch,

    /// A signature failed verification
    #[error("Signature mismatch")]
    SignatureMismatch,

    /// Encryption requested but no session key is installed for the peer
    #[error("No session key for peer {0}")]
    NoSession(String),

    /// The recipient is not in the peer table
    #[error("Unknown peer {0}")]
    PeerUnknown(String),

    /// A DHT RPC got no response within its window
    #[error("RPC timed out")]
    RpcTimeout,

    /// No ACK arrived within the message timeout
    #[error("ACK timed out")]
    AckTimeout,

    /// The retry budget was exhausted before an ACK arrived
    #[error("Max retransmissions exceeded")]
    MaxRetriesExceeded,

    /// The node is stopped; the operation cannot complete
    #[error("Transport closed")]
    TransportClosed,

    /// STUN discovery failed
    #[error("STUN discovery failed: {0}")]
    StunFailed(String),

    /// Inbound datagram shed by the per-source rate gate
    #[error("Rate limited")]
    RateLimited,

    /// Invariant violation; the node must abort
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<mesh_transport::TransportError> for NodeError {
    fn from(e: mesh_transport::TransportError) -> Self {
        match e {
            mesh_transport::TransportError::Closed => Self::TransportClosed,
            mesh_transport::TransportError::StunFailed(msg) => Self::StunFailed(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<mesh_wire::WireError> for NodeError {
    fn from(e: mesh_wire::WireError) -> Self {
        match e {
            mesh_wire::WireError::ChecksumMismatch => Self::ChecksumMismatch,
            mesh_wire::WireError::SignatureMismatch => Self::SignatureMismatch,
            other => Self::MalformedEnvelope(other.to_string()),
        }
    }
}

impl From<mesh_dht::DhtError> for NodeError {
    fn from(e: mesh_dht::DhtError) -> Self {
        match e {
            mesh_dht::DhtError::RpcTimeout { .. } => Self::RpcTimeout,
            mesh_dht::DhtError::Stopped => Self::TransportClosed,
            mesh_dht::DhtError::InvalidRecord(_) => Self::SignatureMismatch,
            other => Self::Internal(other.to_string()),
        }
    }
}
