//! # Symmetric Encryption
//!
//! AES-256-GCM for encrypted unicast application messages.
//!
//! ## Nonce Discipline
//!
//! GCM nonces are 96 bits and MUST be unique per key. `SessionCipher`
//! enforces this with a counter nonce: 4 random prefix bytes fixed at
//! cipher construction, followed by a 64-bit big-endian counter that
//! increments on every encryption. The counter state lives with the cipher,
//! so one `SessionCipher` per installed session key.

use crate::CryptoError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use std::sync::atomic::{AtomicU64, Ordering};
use zeroize::Zeroize;

/// AEAD nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Symmetric session key (256-bit), installed once per authenticated peer.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random key (test topologies).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Get inner bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.write_str("SessionKey(..)")
    }
}

/// Stateful AEAD cipher bound to one session key.
pub struct SessionCipher {
    cipher: Aes256Gcm,
    nonce_prefix: [u8; 4],
    counter: AtomicU64,
}

impl SessionCipher {
    /// Build a cipher around an installed session key.
    pub fn new(key: &SessionKey) -> Self {
        let mut prefix = [0u8; 4];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut prefix);

        Self {
            cipher: Aes256Gcm::new(key.as_bytes().into()),
            nonce_prefix: prefix,
            counter: AtomicU64::new(0),
        }
    }

    /// Encrypt plaintext, returning (ciphertext || tag, nonce).
    ///
    /// # Errors
    ///
    /// `CryptoError::NonceExhausted` once the 64-bit counter wraps;
    /// `CryptoError::EncryptionFailed` on AEAD failure.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CryptoError> {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        if count == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce[..4].copy_from_slice(&self.nonce_prefix);
        nonce[4..].copy_from_slice(&count.to_be_bytes());

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok((ciphertext, nonce))
    }

    /// Decrypt ciphertext produced by a peer's cipher under the same key.
    ///
    /// # Errors
    ///
    /// `CryptoError::DecryptionFailed` on wrong key, wrong nonce, or a
    /// tampered ciphertext (tag mismatch).
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_LEN],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
