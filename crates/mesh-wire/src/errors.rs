//! Wire error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire formats.
#[derive(Debug, Error)]
pub enum WireError {
    /// Datagram could not be parsed as an envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Recomputed checksum differs from the embedded one
    #[error("Envelope checksum mismatch")]
    ChecksumMismatch,

    /// A typed payload carried invalid content after its prefix
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A binary peer record or RPC frame was truncated or inconsistent
    #[error("Malformed binary frame: {0}")]
    MalformedFrame(String),

    /// A signed peer record failed verification under its embedded key
    #[error("Peer record signature mismatch")]
    SignatureMismatch,
}
