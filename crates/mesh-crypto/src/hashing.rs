//! Digest helpers for checksums and node ids.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// SHA-256 digest output (256-bit).
pub type Digest256 = [u8; 32];

/// SHA-1 digest output (160-bit), the node-id width on the wire.
pub type NodeDigest = [u8; 20];

/// Hash data with SHA-256 (one-shot). Used for envelope checksums and
/// session-key derivation.
pub fn sha256(data: &[u8]) -> Digest256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive the 160-bit overlay node id from a device identifier.
///
/// SHA-1 is a wire-compatibility requirement of the DHT id space, not a
/// collision-resistance claim; identity rests on the Ed25519 keys.
pub fn node_digest(device_id: &str) -> NodeDigest {
    let mut hasher = Sha1::new();
    hasher.update(device_id.as_bytes());
    hasher.finalize().into()
}
