//! # X25519 Key Agreement
//!
//! Ephemeral Diffie-Hellman exchange bound to the authentication handshake.
//! Both sides derive the same symmetric session key from their own secret
//! and the remote public half:
//!
//! ```text
//!   session_key = SHA-256( DH(secret_A, public_B) || "beammesh-session-v1" )
//! ```
//!
//! The domain-separation suffix keeps the raw curve output out of the AEAD.

use crate::hashing::sha256;
use crate::symmetric::SessionKey;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Domain separator mixed into the session-key derivation.
const SESSION_KDF_INFO: &[u8] = b"beammesh-session-v1";

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgreementPublicKey([u8; 32]);

impl AgreementPublicKey {
    /// Create from bytes. Any 32-byte string is a valid X25519 public key.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice of arbitrary length.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// X25519 keypair held for the lifetime of the node.
///
/// The secret half is a `StaticSecret` (zeroized on drop by x25519-dalek)
/// and is never exposed by this API.
pub struct AgreementKeyPair {
    secret: StaticSecret,
    public: X25519Public,
}

impl AgreementKeyPair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    /// Get the public half.
    pub fn public_key(&self) -> AgreementPublicKey {
        AgreementPublicKey(self.public.to_bytes())
    }

    /// Derive the shared session key with a remote peer.
    ///
    /// Symmetric: A.derive(pub_B) == B.derive(pub_A).
    pub fn derive_session_key(&self, remote: &AgreementPublicKey) -> SessionKey {
        let remote_public = X25519Public::from(*remote.as_bytes());
        let shared = self.secret.diffie_hellman(&remote_public);

        let mut ikm = Vec::with_capacity(32 + SESSION_KDF_INFO.len());
        ikm.extend_from_slice(shared.as_bytes());
        ikm.extend_from_slice(SESSION_KDF_INFO);

        SessionKey::from_bytes(sha256(&ikm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_key() {
        let alice = AgreementKeyPair::generate();
        let bob = AgreementKeyPair::generate();

        let key_a = alice.derive_session_key(&bob.public_key());
        let key_b = bob.derive_session_key(&alice.public_key());

        assert_eq!(key_a.as_bytes(), key_b.as_bytes());
    }

    #[test]
    fn test_third_party_derives_different_key() {
        let alice = AgreementKeyPair::generate();
        let bob = AgreementKeyPair::generate();
        let eve = AgreementKeyPair::generate();

        let key_ab = alice.derive_session_key(&bob.public_key());
        let key_eb = eve.derive_session_key(&bob.public_key());

        assert_ne!(key_ab.as_bytes(), key_eb.as_bytes());
    }

    #[test]
    fn test_public_key_slice_roundtrip() {
        let pair = AgreementKeyPair::generate();
        let public = pair.public_key();

        let restored = AgreementPublicKey::from_slice(public.as_bytes()).unwrap();
        assert_eq!(public, restored);
        assert!(AgreementPublicKey::from_slice(&[0u8; 16]).is_none());
    }
}
