//! # Mesh Crypto - Cryptographic Primitives for the Overlay
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `signatures` | Ed25519 | Node authentication, signed peer records |
//! | `agreement` | X25519 | Per-peer session key establishment |
//! | `symmetric` | AES-256-GCM | Encrypted unicast application messages |
//! | `hashing` | SHA-256, SHA-1 | Envelope checksums, 160-bit node ids |
//! | `identity` | — | Process-wide node identity (keys + node id) |
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency at signing time
//! - **X25519**: RFC 7748 Diffie-Hellman; secrets zeroized on drop
//! - **AES-256-GCM**: 96-bit counter nonces, unique per session key
//!
//! Secret key material never leaves this crate's types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agreement;
pub mod errors;
pub mod hashing;
pub mod identity;
pub mod signatures;
pub mod symmetric;

// Re-exports
pub use agreement::{AgreementKeyPair, AgreementPublicKey};
pub use errors::CryptoError;
pub use hashing::{node_digest, sha256, Digest256, NodeDigest};
pub use identity::NodeIdentity;
pub use signatures::{PublicSigningKey, Signature, SigningKeyPair};
pub use symmetric::{SessionCipher, SessionKey, NONCE_LEN};
