//! Signed peer records: the DHT-visible identity statement.
//!
//! Binary layout (all integers big-endian):
//!
//! ```text
//! dlen(u8) | device_id | ilen(u8) | ip | port(u16) |
//! klen(u16) | public_key | slen(u16) | signature | ts(i64)
//! ```
//!
//! The signature covers `device_id || ip || port || public_key || ts` and
//! must verify under the embedded Ed25519 public key; records that fail
//! verification are discarded at the door.

use crate::errors::WireError;
use mesh_crypto::{NodeIdentity, PublicSigningKey, Signature};
use std::net::{IpAddr, Ipv4Addr};

/// Self-signed statement of a peer's device id, endpoint, and public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedPeerInfo {
    /// Device id
    pub device_id: String,
    /// Advertised IP
    pub ip: IpAddr,
    /// Advertised UDP port
    pub port: u16,
    /// Raw Ed25519 public key (32 bytes)
    pub public_key: Vec<u8>,
    /// Ed25519 signature over the signable bytes (64 bytes)
    pub signature: Vec<u8>,
    /// Record creation time, epoch milliseconds
    pub timestamp_ms: i64,
}

impl SignedPeerInfo {
    /// Build and sign a record for the local identity at an endpoint.
    pub fn for_identity(
        identity: &NodeIdentity,
        ip: IpAddr,
        port: u16,
        timestamp_ms: i64,
    ) -> Self {
        let public_key = identity.signing_public().as_bytes().to_vec();
        let signable = Self::signable(identity.device_id(), &ip, port, &public_key, timestamp_ms);
        let signature = identity.sign(&signable).as_bytes().to_vec();

        Self {
            device_id: identity.device_id().to_string(),
            ip,
            port,
            public_key,
            signature,
            timestamp_ms,
        }
    }

    fn signable(
        device_id: &str,
        ip: &IpAddr,
        port: u16,
        public_key: &[u8],
        timestamp_ms: i64,
    ) -> Vec<u8> {
        let ip_text = ip.to_string();
        let mut bytes =
            Vec::with_capacity(device_id.len() + ip_text.len() + 2 + public_key.len() + 8);
        bytes.extend_from_slice(device_id.as_bytes());
        bytes.extend_from_slice(ip_text.as_bytes());
        bytes.extend_from_slice(&port.to_be_bytes());
        bytes.extend_from_slice(public_key);
        bytes.extend_from_slice(&timestamp_ms.to_be_bytes());
        bytes
    }

    /// Verify the embedded signature under the embedded public key.
    ///
    /// # Errors
    ///
    /// `WireError::SignatureMismatch` when the record does not verify;
    /// `WireError::MalformedFrame` when key or signature bytes are not
    /// well-formed Ed25519 material.
    pub fn verify(&self) -> Result<(), WireError> {
        let key = PublicSigningKey::from_slice(&self.public_key)
            .map_err(|_| WireError::MalformedFrame("bad public key in peer record".into()))?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|_| WireError::MalformedFrame("bad signature in peer record".into()))?;

        let signable = Self::signable(
            &self.device_id,
            &self.ip,
            self.port,
            &self.public_key,
            self.timestamp_ms,
        );
        key.verify(&signable, &signature)
            .map_err(|_| WireError::SignatureMismatch)
    }

    /// Encode to the binary layout.
    pub fn encode(&self) -> Vec<u8> {
        let ip_text = self.ip.to_string();
        let mut bytes = Vec::with_capacity(
            2 + self.device_id.len() + ip_text.len() + 2 + 4 + self.public_key.len()
                + self.signature.len()
                + 8,
        );
        bytes.push(self.device_id.len() as u8);
        bytes.extend_from_slice(self.device_id.as_bytes());
        bytes.push(ip_text.len() as u8);
        bytes.extend_from_slice(ip_text.as_bytes());
        bytes.extend_from_slice(&self.port.to_be_bytes());
        bytes.extend_from_slice(&(self.public_key.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.public_key);
        bytes.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.signature);
        bytes.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        bytes
    }

    /// Decode one record from the front of `bytes`, returning the record
    /// and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let mut cursor = Cursor::new(bytes);

        let dlen = cursor.take_u8()? as usize;
        let device_id = String::from_utf8(cursor.take(dlen)?.to_vec())
            .map_err(|_| WireError::MalformedFrame("device id is not UTF-8".into()))?;

        let ilen = cursor.take_u8()? as usize;
        let ip_text = std::str::from_utf8(cursor.take(ilen)?)
            .map_err(|_| WireError::MalformedFrame("ip is not UTF-8".into()))?;
        let ip: IpAddr = ip_text
            .parse()
            .map_err(|_| WireError::MalformedFrame(format!("bad ip {ip_text:?}")))?;

        let port = cursor.take_u16()?;

        let klen = cursor.take_u16()? as usize;
        let public_key = cursor.take(klen)?.to_vec();

        let slen = cursor.take_u16()? as usize;
        let signature = cursor.take(slen)?.to_vec();

        let timestamp_ms = cursor.take_i64()?;

        Ok((
            Self {
                device_id,
                ip,
                port,
                public_key,
                signature,
                timestamp_ms,
            },
            cursor.consumed(),
        ))
    }

    /// The record's endpoint as a socket address.
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.ip, self.port)
    }

    /// A placeholder record for tests and donors (unsigned, never passes
    /// `verify`).
    pub fn unsigned(device_id: impl Into<String>, ip: Ipv4Addr, port: u16) -> Self {
        Self {
            device_id: device_id.into(),
            ip: IpAddr::V4(ip),
            port,
            public_key: Vec::new(),
            signature: Vec::new(),
            timestamp_ms: 0,
        }
    }
}

/// Minimal bounds-checked reader over a byte slice.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn consumed(&self) -> usize {
        self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| WireError::MalformedFrame("truncated frame".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn take_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn take_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn take_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn take_i64(&mut self) -> Result<i64, WireError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("slice length checked");
        Ok(i64::from_be_bytes(bytes))
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_record() -> SignedPeerInfo {
        let identity = NodeIdentity::new("kiosk-7");
        SignedPeerInfo::for_identity(
            &identity,
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            40100,
            1_714_560_000_000,
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let record = signed_record();
        let bytes = record.encode();
        let (decoded, consumed) = SignedPeerInfo::decode(&bytes).unwrap();

        assert_eq!(decoded, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_fresh_record_verifies() {
        assert!(signed_record().verify().is_ok());
    }

    #[test]
    fn test_tampered_port_fails_verification() {
        let mut record = signed_record();
        record.port += 1;
        assert!(record.verify().is_err());
    }

    #[test]
    fn test_foreign_key_fails_verification() {
        let mut record = signed_record();
        let other = NodeIdentity::new("imposter");
        record.public_key = other.signing_public().as_bytes().to_vec();
        assert!(record.verify().is_err());
    }

    #[test]
    fn test_truncated_record_rejected() {
        let bytes = signed_record().encode();
        assert!(SignedPeerInfo::decode(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_unsigned_placeholder_never_verifies() {
        let record = SignedPeerInfo::unsigned("?", Ipv4Addr::LOCALHOST, 9000);
        assert!(record.verify().is_err());
    }
}
