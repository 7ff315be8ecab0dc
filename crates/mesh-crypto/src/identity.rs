//! Process-wide node identity.

use crate::agreement::{AgreementKeyPair, AgreementPublicKey};
use crate::hashing::{node_digest, NodeDigest};
use crate::signatures::{PublicSigningKey, Signature, SigningKeyPair};
use crate::symmetric::SessionKey;

/// The local node's cryptographic identity, created once at startup.
///
/// Owns the long-term Ed25519 signing keypair, the X25519 agreement
/// keypair, and the 160-bit node id derived from the device identifier.
/// All three are immutable for the lifetime of the process.
pub struct NodeIdentity {
    device_id: String,
    node_id: NodeDigest,
    signing: SigningKeyPair,
    agreement: AgreementKeyPair,
}

impl NodeIdentity {
    /// Create a fresh identity for a device identifier, generating both
    /// keypairs.
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        let node_id = node_digest(&device_id);

        Self {
            device_id,
            node_id,
            signing: SigningKeyPair::generate(),
            agreement: AgreementKeyPair::generate(),
        }
    }

    /// The device identifier this identity was created for.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The derived 160-bit node id (stable for the process lifetime).
    pub fn node_id(&self) -> &NodeDigest {
        &self.node_id
    }

    /// Public half of the signing keypair.
    pub fn signing_public(&self) -> PublicSigningKey {
        self.signing.public_key()
    }

    /// Public half of the agreement keypair.
    pub fn agreement_public(&self) -> AgreementPublicKey {
        self.agreement.public_key()
    }

    /// Sign a message under the long-term signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    /// Derive the session key shared with a remote agreement public key.
    pub fn derive_session_key(&self, remote: &AgreementPublicKey) -> SessionKey {
        self.agreement.derive_session_key(remote)
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("device_id", &self.device_id)
            .field("node_id", &hex_prefix(&self.node_id))
            .finish_non_exhaustive()
    }
}

fn hex_prefix(digest: &NodeDigest) -> String {
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::node_digest;

    #[test]
    fn test_node_id_matches_device_digest() {
        let identity = NodeIdentity::new("kiosk-7");
        assert_eq!(identity.node_id(), &node_digest("kiosk-7"));
    }

    #[test]
    fn test_handshake_key_agreement() {
        let a = NodeIdentity::new("a");
        let b = NodeIdentity::new("b");

        let key_a = a.derive_session_key(&b.agreement_public());
        let key_b = b.derive_session_key(&a.agreement_public());

        assert_eq!(key_a.as_bytes(), key_b.as_bytes());
    }

    #[test]
    fn test_signatures_verify_under_published_key() {
        let identity = NodeIdentity::new("kiosk-7");
        let message = b"challenge-bytes";

        let signature = identity.sign(message);
        assert!(identity
            .signing_public()
            .verify(message, &signature)
            .is_ok());
    }
}
