//! # Mesh Wire - On-Wire Formats for the Overlay
//!
//! Two framings coexist on the same UDP socket, and they are deliberately
//! NOT unified:
//!
//! - **Application envelopes** are JSON (`envelope`), checksummed over a
//!   canonical pre-image. This is the compatibility surface with existing
//!   peers.
//! - **DHT RPC frames** are compact big-endian binary (`rpc`), carried
//!   inside the payload of a DATA envelope. Signed peer records
//!   (`peer_record`) use the same binary discipline because their signature
//!   covers the exact byte layout.
//!
//! The checksum and every signature depend on these exact pre-images;
//! changing either framing is a wire break.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod errors;
pub mod payload;
pub mod peer_record;
pub mod rpc;

// Re-exports
pub use envelope::{Envelope, EnvelopeKind};
pub use errors::WireError;
pub use payload::{AppPayload, AuthChallenge, AuthResponse, GossipPeer, GossipSnapshot};
pub use peer_record::SignedPeerInfo;
pub use rpc::RpcMessage;
