//! Challenge/response authentication bound to an X25519 exchange.
//!
//! 1. Initiator sends a random 32-byte challenge with its agreement and
//!    signing public keys, the whole tuple signed under its signing key.
//! 2. Responder verifies, derives the session key from its own agreement
//!    secret and the initiator's agreement public, and answers with its
//!    keys plus a signature over the raw challenge.
//! 3. Initiator verifies the response signature, derives the same session
//!    key, and marks the peer authenticated.
//!
//! Session keys are per-peer. A peer that is listed but unauthenticated
//! can be challenged again at any time.

use crate::error::NodeError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use mesh_crypto::{AgreementPublicKey, NodeIdentity, PublicSigningKey, Signature};
use mesh_wire::{AuthChallenge, AuthResponse};
use rand::RngCore;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;

/// Challenge width in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// How long an unanswered challenge stays valid.
pub const CHALLENGE_WINDOW_MS: i64 = 60_000;

/// Build a signed challenge payload for the local identity. Returns the
/// payload and the raw challenge bytes to remember for the response.
pub fn build_challenge(identity: &NodeIdentity) -> (AuthChallenge, [u8; CHALLENGE_LEN]) {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);

    let agreement_public = identity.agreement_public();
    let signing_public = identity.signing_public();
    let signable = AuthChallenge::signable(
        &challenge,
        agreement_public.as_bytes(),
        signing_public.as_bytes(),
    );
    let signature = identity.sign(&signable);

    let payload = AuthChallenge {
        challenge: BASE64.encode(challenge),
        agreement_public: BASE64.encode(agreement_public.as_bytes()),
        signing_public: BASE64.encode(signing_public.as_bytes()),
        signature: BASE64.encode(signature.as_bytes()),
    };
    (payload, challenge)
}

/// Verify an inbound challenge: the embedded signature must cover the
/// challenge and both keys under the embedded signing key.
///
/// Returns the raw challenge plus the initiator's keys.
pub fn verify_challenge(
    payload: &AuthChallenge,
) -> Result<(Vec<u8>, AgreementPublicKey, PublicSigningKey), NodeError> {
    let (challenge, agreement_bytes, signing_bytes, signature_bytes) = payload.decoded()?;

    let signing_public = PublicSigningKey::from_slice(&signing_bytes)
        .map_err(|_| NodeError::SignatureMismatch)?;
    let agreement_public = AgreementPublicKey::from_slice(&agreement_bytes)
        .ok_or(NodeError::SignatureMismatch)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| NodeError::SignatureMismatch)?;

    let signable = AuthChallenge::signable(&challenge, &agreement_bytes, &signing_bytes);
    signing_public
        .verify(&signable, &signature)
        .map_err(|_| NodeError::SignatureMismatch)?;

    Ok((challenge, agreement_public, signing_public))
}

/// Build the response to a verified challenge.
pub fn build_response(identity: &NodeIdentity, challenge: &[u8]) -> AuthResponse {
    let signature = identity.sign(challenge);
    AuthResponse {
        challenge: BASE64.encode(challenge),
        signature: BASE64.encode(signature.as_bytes()),
        signing_public: BASE64.encode(identity.signing_public().as_bytes()),
        agreement_public: BASE64.encode(identity.agreement_public().as_bytes()),
    }
}

/// Verify a response against the challenge we issued. Returns the
/// responder's keys on success.
pub fn verify_response(
    payload: &AuthResponse,
    expected_challenge: &[u8; CHALLENGE_LEN],
) -> Result<(PublicSigningKey, AgreementPublicKey), NodeError> {
    let (challenge, signature_bytes, signing_bytes, agreement_bytes) = payload.decoded()?;

    if challenge != expected_challenge {
        return Err(NodeError::SignatureMismatch);
    }

    let signing_public = PublicSigningKey::from_slice(&signing_bytes)
        .map_err(|_| NodeError::SignatureMismatch)?;
    let agreement_public = AgreementPublicKey::from_slice(&agreement_bytes)
        .ok_or(NodeError::SignatureMismatch)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| NodeError::SignatureMismatch)?;

    signing_public
        .verify(&challenge, &signature)
        .map_err(|_| NodeError::SignatureMismatch)?;

    Ok((signing_public, agreement_public))
}

/// Outstanding challenges keyed by the endpoint we challenged.
#[derive(Default)]
pub struct AuthManager {
    outstanding: HashMap<SocketAddr, ([u8; CHALLENGE_LEN], i64)>,
}

impl AuthManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a challenge to this endpoint is already in flight.
    pub fn in_flight(&self, addr: &SocketAddr) -> bool {
        self.outstanding.contains_key(addr)
    }

    /// Remember a challenge sent to an endpoint.
    pub fn record(&mut self, addr: SocketAddr, challenge: [u8; CHALLENGE_LEN], now_ms: i64) {
        self.outstanding.insert(addr, (challenge, now_ms));
    }

    /// Claim the challenge for a responding endpoint.
    pub fn take(&mut self, addr: &SocketAddr) -> Option<[u8; CHALLENGE_LEN]> {
        self.outstanding.remove(addr).map(|(challenge, _)| challenge)
    }

    /// Drop challenges that were never answered.
    pub fn gc(&mut self, now_ms: i64) {
        let before = self.outstanding.len();
        self.outstanding
            .retain(|_, (_, sent_ms)| now_ms.saturating_sub(*sent_ms) < CHALLENGE_WINDOW_MS);
        let dropped = before - self.outstanding.len();
        if dropped > 0 {
            debug!(dropped, "expired unanswered auth challenges");
        }
    }
}
