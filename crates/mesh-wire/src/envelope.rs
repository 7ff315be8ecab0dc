//! The JSON application envelope.
//!
//! Wire shape (field order is the canonical order):
//!
//! ```json
//! { "type": 0, "fromPeerId": "kiosk-7", "toPeerId": "kiosk-9",
//!   "payload": "<base64>", "checksum": "<hex-sha256>",
//!   "sequenceNumber": 17, "timestamp": "2024-05-01T12:00:00Z" }
//! ```
//!
//! The checksum is SHA-256 over the canonical pre-image: this same JSON
//! with the `checksum` field set to the empty string. The receiver
//! recomputes it and discards on mismatch (emitting a NACK).

use crate::errors::WireError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use mesh_crypto::hashing::sha256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Envelope kind discriminant (wire value is the integer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// Application or DHT payload
    Data = 0,
    /// Acknowledgement of a DATA envelope
    Ack = 1,
    /// Negative acknowledgement (checksum failure)
    Nack = 2,
    /// Keep-alive, refreshes last-seen only
    Heartbeat = 3,
    /// Gossip snapshot of the peer table
    RoutingTable = 4,
    /// Performance report (opaque to the core)
    Performance = 5,
    /// File chunk (opaque to the core)
    File = 6,
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::Ack),
            2 => Ok(Self::Nack),
            3 => Ok(Self::Heartbeat),
            4 => Ok(Self::RoutingTable),
            5 => Ok(Self::Performance),
            6 => Ok(Self::File),
            other => Err(WireError::MalformedEnvelope(format!(
                "unknown envelope kind {other}"
            ))),
        }
    }
}

impl Serialize for EnvelopeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for EnvelopeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        EnvelopeKind::try_from(value).map_err(serde::de::Error::custom)
    }
}

mod base64_payload {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// The on-wire unit exchanged between overlay nodes.
///
/// Field order below IS the canonical pre-image order; do not reorder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope kind
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Sender device id
    #[serde(rename = "fromPeerId")]
    pub from_peer_id: String,
    /// Recipient device id; absent on broadcast-style envelopes
    #[serde(rename = "toPeerId", default, skip_serializing_if = "Option::is_none")]
    pub to_peer_id: Option<String>,
    /// Opaque payload bytes (base64 on the wire)
    #[serde(with = "base64_payload")]
    pub payload: Vec<u8>,
    /// Hex SHA-256 over the canonical pre-image; empty inside the pre-image
    #[serde(default)]
    pub checksum: String,
    /// Monotonic per sender socket, wraps modulo 2^32
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: u32,
    /// Send time
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Build a sealed envelope (checksum computed) stamped with now.
    pub fn new(
        kind: EnvelopeKind,
        from_peer_id: impl Into<String>,
        to_peer_id: Option<String>,
        payload: Vec<u8>,
        sequence_number: u32,
    ) -> Self {
        let mut envelope = Self {
            kind,
            from_peer_id: from_peer_id.into(),
            to_peer_id,
            payload,
            checksum: String::new(),
            sequence_number,
            timestamp: Utc::now(),
        };
        envelope.checksum = envelope.compute_checksum();
        envelope
    }

    /// Build the ACK for a received DATA envelope.
    ///
    /// The payload is the single byte `acked_sequence & 0xFF` (wire
    /// contract); the ACK itself runs on the acker's own sequence counter.
    pub fn ack(
        from_peer_id: impl Into<String>,
        to_peer_id: impl Into<String>,
        acked_sequence: u32,
        own_sequence: u32,
    ) -> Self {
        Self::new(
            EnvelopeKind::Ack,
            from_peer_id,
            Some(to_peer_id.into()),
            vec![(acked_sequence & 0xFF) as u8],
            own_sequence,
        )
    }

    /// Build the NACK for a corrupted envelope: the sequence byte followed
    /// by a UTF-8 reason.
    pub fn nack(
        from_peer_id: impl Into<String>,
        to_peer_id: impl Into<String>,
        nacked_sequence: u32,
        reason: &str,
        own_sequence: u32,
    ) -> Self {
        let mut payload = vec![(nacked_sequence & 0xFF) as u8];
        payload.extend_from_slice(reason.as_bytes());
        Self::new(
            EnvelopeKind::Nack,
            from_peer_id,
            Some(to_peer_id.into()),
            payload,
            own_sequence,
        )
    }

    /// Serialize the canonical pre-image: this envelope with an empty
    /// checksum field.
    fn preimage(&self) -> Vec<u8> {
        let mut unsealed = self.clone();
        unsealed.checksum = String::new();
        // Serializing a struct we just built cannot fail
        serde_json::to_vec(&unsealed).expect("envelope pre-image serialization")
    }

    /// Compute the hex SHA-256 checksum of the pre-image.
    pub fn compute_checksum(&self) -> String {
        hex::encode(sha256(&self.preimage()))
    }

    /// Recompute and compare the embedded checksum.
    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("envelope serialization")
    }

    /// Decode from wire bytes. Checksum is NOT verified here; callers
    /// check `checksum_valid` so they can answer with a NACK.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(|e| WireError::MalformedEnvelope(e.to_string()))
    }

    /// The acknowledged sequence byte of an ACK envelope.
    pub fn ack_sequence_byte(&self) -> Option<u8> {
        if self.kind == EnvelopeKind::Ack {
            self.payload.first().copied()
        } else {
            None
        }
    }

    /// The sequence byte and reason of a NACK envelope.
    pub fn nack_contents(&self) -> Option<(u8, String)> {
        if self.kind != EnvelopeKind::Nack || self.payload.is_empty() {
            return None;
        }
        let reason = String::from_utf8_lossy(&self.payload[1..]).into_owned();
        Some((self.payload[0], reason))
    }
}
