//! Typed payloads carried inside envelopes.
//!
//! The first bytes of a payload select its handler: a short ASCII prefix
//! for JSON-bodied messages, `dht:` for binary RPC frames, `enc:` for the
//! AEAD wrapper. Anything unrecognized is `Opaque` and reaches the
//! application unchanged.

use crate::errors::WireError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use mesh_crypto::NONCE_LEN;
use serde::{Deserialize, Serialize};

const PREFIX_GOSSIP: &[u8] = b"gossip:";
const PREFIX_AUTH_CHALLENGE: &[u8] = b"auth-challenge:";
const PREFIX_AUTH_RESPONSE: &[u8] = b"auth-response:";
const PREFIX_CONTENT_ANNOUNCEMENT: &[u8] = b"content-announcement:";
const PREFIX_CONTENT_REQUEST: &[u8] = b"content-request:";
const PREFIX_CONTENT_DATA: &[u8] = b"content-data:";
const PREFIX_DHT: &[u8] = b"dht:";
const PREFIX_ENCRYPTED: &[u8] = b"enc:";

/// Base64-decode a field, mapping errors to `MalformedPayload`.
fn b64d(field: &str, value: &str) -> Result<Vec<u8>, WireError> {
    BASE64
        .decode(value)
        .map_err(|e| WireError::MalformedPayload(format!("{field}: {e}")))
}

/// Authentication challenge sent by the handshake initiator.
///
/// `signature` is the initiator's Ed25519 signature over
/// `challenge || agreement_public || signing_public` (raw bytes, in that
/// order), so the challenge cannot be replayed under a different key set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// Random 32-byte challenge (base64)
    pub challenge: String,
    /// Initiator's X25519 public key (base64)
    #[serde(rename = "agreementPublic")]
    pub agreement_public: String,
    /// Initiator's Ed25519 public key (base64)
    #[serde(rename = "signingPublic")]
    pub signing_public: String,
    /// Initiator's signature binding the above (base64)
    pub signature: String,
}

impl AuthChallenge {
    /// The byte string the initiator signs.
    pub fn signable(challenge: &[u8], agreement_public: &[u8], signing_public: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(challenge.len() + 64);
        bytes.extend_from_slice(challenge);
        bytes.extend_from_slice(agreement_public);
        bytes.extend_from_slice(signing_public);
        bytes
    }

    /// Decode the base64 fields into raw bytes:
    /// (challenge, agreement_public, signing_public, signature).
    #[allow(clippy::type_complexity)]
    pub fn decoded(&self) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>), WireError> {
        Ok((
            b64d("challenge", &self.challenge)?,
            b64d("agreementPublic", &self.agreement_public)?,
            b64d("signingPublic", &self.signing_public)?,
            b64d("signature", &self.signature)?,
        ))
    }
}

/// Authentication response from the handshake responder.
///
/// `signature` is the responder's Ed25519 signature over the raw challenge
/// bytes it received.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Echo of the challenge (base64)
    pub challenge: String,
    /// Responder's signature over the challenge bytes (base64)
    pub signature: String,
    /// Responder's Ed25519 public key (base64)
    #[serde(rename = "signingPublic")]
    pub signing_public: String,
    /// Responder's X25519 public key (base64)
    #[serde(rename = "agreementPublic")]
    pub agreement_public: String,
}

impl AuthResponse {
    /// Decode the base64 fields into raw bytes:
    /// (challenge, signature, signing_public, agreement_public).
    #[allow(clippy::type_complexity)]
    pub fn decoded(&self) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>), WireError> {
        Ok((
            b64d("challenge", &self.challenge)?,
            b64d("signature", &self.signature)?,
            b64d("signingPublic", &self.signing_public)?,
            b64d("agreementPublic", &self.agreement_public)?,
        ))
    }
}

/// One peer entry inside a gossip snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipPeer {
    /// Device id
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Advertised IP (dotted quad)
    pub ip: String,
    /// Advertised UDP port
    pub port: u16,
    /// Ed25519 public key if the sender has authenticated this peer (base64)
    #[serde(rename = "signingPublic", default, skip_serializing_if = "Option::is_none")]
    pub signing_public: Option<String>,
    /// Sender's last-seen for this peer, epoch milliseconds
    #[serde(rename = "lastSeen")]
    pub last_seen_ms: i64,
}

/// A snapshot of the sender's peer table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipSnapshot {
    /// Known peers at snapshot time
    pub peers: Vec<GossipPeer>,
    /// Snapshot time
    pub timestamp: DateTime<Utc>,
}

/// A typed payload, decoded from the leading prefix bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum AppPayload {
    /// Peer-table snapshot
    Gossip(GossipSnapshot),
    /// Handshake step 1
    AuthChallenge(AuthChallenge),
    /// Handshake step 2
    AuthResponse(AuthResponse),
    /// A peer is offering content under this id
    ContentAnnouncement {
        /// Content identifier
        content_id: String,
    },
    /// A peer asks for the bytes of this id
    ContentRequest {
        /// Content identifier
        content_id: String,
    },
    /// Content bytes in reply to a request
    ContentData {
        /// Content identifier
        content_id: String,
        /// The content itself
        bytes: Vec<u8>,
    },
    /// A binary DHT RPC frame (decoded by `rpc`)
    Dht(Vec<u8>),
    /// AEAD-wrapped inner payload
    Encrypted {
        /// 96-bit GCM nonce
        nonce: [u8; NONCE_LEN],
        /// Ciphertext with appended tag
        ciphertext: Vec<u8>,
    },
    /// Unrecognized payload, surfaced to the application unchanged
    Opaque(Vec<u8>),
}

/// JSON body of the content-data payload.
#[derive(Serialize, Deserialize)]
struct ContentDataBody {
    #[serde(rename = "contentId")]
    content_id: String,
    /// base64
    bytes: String,
}

fn json_after<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, WireError> {
    serde_json::from_slice(bytes).map_err(|e| WireError::MalformedPayload(e.to_string()))
}

fn utf8_after(bytes: &[u8]) -> Result<String, WireError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| WireError::MalformedPayload("content id is not UTF-8".into()))
}

impl AppPayload {
    /// Decode payload bytes by prefix. Only a recognized prefix with an
    /// invalid body is an error; unrecognized bytes are `Opaque`.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if let Some(rest) = bytes.strip_prefix(PREFIX_ENCRYPTED) {
            if rest.len() < NONCE_LEN {
                return Err(WireError::MalformedPayload("encrypted payload too short".into()));
            }
            let mut nonce = [0u8; NONCE_LEN];
            nonce.copy_from_slice(&rest[..NONCE_LEN]);
            return Ok(Self::Encrypted {
                nonce,
                ciphertext: rest[NONCE_LEN..].to_vec(),
            });
        }
        if let Some(rest) = bytes.strip_prefix(PREFIX_GOSSIP) {
            return Ok(Self::Gossip(json_after(rest)?));
        }
        if let Some(rest) = bytes.strip_prefix(PREFIX_AUTH_CHALLENGE) {
            return Ok(Self::AuthChallenge(json_after(rest)?));
        }
        if let Some(rest) = bytes.strip_prefix(PREFIX_AUTH_RESPONSE) {
            return Ok(Self::AuthResponse(json_after(rest)?));
        }
        if let Some(rest) = bytes.strip_prefix(PREFIX_CONTENT_ANNOUNCEMENT) {
            return Ok(Self::ContentAnnouncement {
                content_id: utf8_after(rest)?,
            });
        }
        if let Some(rest) = bytes.strip_prefix(PREFIX_CONTENT_REQUEST) {
            return Ok(Self::ContentRequest {
                content_id: utf8_after(rest)?,
            });
        }
        if let Some(rest) = bytes.strip_prefix(PREFIX_CONTENT_DATA) {
            let body: ContentDataBody = json_after(rest)?;
            return Ok(Self::ContentData {
                bytes: b64d("bytes", &body.bytes)?,
                content_id: body.content_id,
            });
        }
        if let Some(rest) = bytes.strip_prefix(PREFIX_DHT) {
            return Ok(Self::Dht(rest.to_vec()));
        }
        Ok(Self::Opaque(bytes.to_vec()))
    }

    /// Encode to payload bytes (inverse of `decode`).
    pub fn encode(&self) -> Vec<u8> {
        fn with_prefix(prefix: &[u8], body: &[u8]) -> Vec<u8> {
            let mut bytes = Vec::with_capacity(prefix.len() + body.len());
            bytes.extend_from_slice(prefix);
            bytes.extend_from_slice(body);
            bytes
        }

        match self {
            Self::Gossip(snapshot) => with_prefix(
                PREFIX_GOSSIP,
                &serde_json::to_vec(snapshot).expect("gossip serialization"),
            ),
            Self::AuthChallenge(challenge) => with_prefix(
                PREFIX_AUTH_CHALLENGE,
                &serde_json::to_vec(challenge).expect("auth challenge serialization"),
            ),
            Self::AuthResponse(response) => with_prefix(
                PREFIX_AUTH_RESPONSE,
                &serde_json::to_vec(response).expect("auth response serialization"),
            ),
            Self::ContentAnnouncement { content_id } => {
                with_prefix(PREFIX_CONTENT_ANNOUNCEMENT, content_id.as_bytes())
            }
            Self::ContentRequest { content_id } => {
                with_prefix(PREFIX_CONTENT_REQUEST, content_id.as_bytes())
            }
            Self::ContentData { content_id, bytes } => {
                let body = ContentDataBody {
                    content_id: content_id.clone(),
                    bytes: BASE64.encode(bytes),
                };
                with_prefix(
                    PREFIX_CONTENT_DATA,
                    &serde_json::to_vec(&body).expect("content data serialization"),
                )
            }
            Self::Dht(frame) => with_prefix(PREFIX_DHT, frame),
            Self::Encrypted { nonce, ciphertext } => {
                let mut bytes =
                    Vec::with_capacity(PREFIX_ENCRYPTED.len() + NONCE_LEN + ciphertext.len());
                bytes.extend_from_slice(PREFIX_ENCRYPTED);
                bytes.extend_from_slice(nonce);
                bytes.extend_from_slice(ciphertext);
                bytes
            }
            Self::Opaque(bytes) => bytes.clone(),
        }
    }
}
