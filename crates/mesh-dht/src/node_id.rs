//! Node ids and XOR distance.

use mesh_crypto::hashing::node_digest;
use std::fmt;

/// Width of a node id in bytes (160 bits).
pub const NODE_ID_LEN: usize = 20;

/// 160-bit node identifier, the SHA-1 of the device id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; NODE_ID_LEN]);

impl NodeId {
    /// Create from raw bytes.
    pub fn new(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive from a device identifier.
    pub fn from_device_id(device_id: &str) -> Self {
        Self(node_digest(device_id))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Full XOR distance between two ids. Ordering is lexicographic on the
/// XOR bytes, which gives the total order Kademlia lookups sort by.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Distance(pub [u8; NODE_ID_LEN]);

impl Distance {
    /// True when the two ids were identical.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

/// Byte-wise XOR of two node ids.
pub fn xor_distance(a: &NodeId, b: &NodeId) -> Distance {
    let mut out = [0u8; NODE_ID_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a.0[i] ^ b.0[i];
    }
    Distance(out)
}

/// Bucket index for a remote id: the zero-based position of the most
/// significant differing bit, counted from the high bit. Index 0 means the
/// ids differ in their very first bit; identical ids have no bucket.
pub fn bucket_index(local: &NodeId, remote: &NodeId) -> Option<usize> {
    for i in 0..NODE_ID_LEN {
        let xor = local.0[i] ^ remote.0[i];
        if xor != 0 {
            return Some(i * 8 + xor.leading_zeros() as usize);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_symmetric() {
        let a = NodeId::from_device_id("a");
        let b = NodeId::from_device_id("b");
        assert_eq!(xor_distance(&a, &b), xor_distance(&b, &a));
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = NodeId::from_device_id("a");
        assert!(xor_distance(&a, &a).is_zero());
        assert_eq!(bucket_index(&a, &a), None);
    }

    #[test]
    fn test_xor_total_order() {
        // For distinct ids, exactly one of d(A,T) < d(B,T), d(B,T) < d(A,T).
        let target = NodeId::from_device_id("target");
        let ids: Vec<NodeId> = (0..16)
            .map(|i| NodeId::from_device_id(&format!("node-{i}")))
            .collect();

        for a in &ids {
            for b in &ids {
                let da = xor_distance(a, &target);
                let db = xor_distance(b, &target);
                if a == b {
                    assert_eq!(da, db);
                } else {
                    assert_ne!(da, db);
                    assert_eq!(da < db, !(db < da));
                }
            }
        }
    }

    #[test]
    fn test_bucket_index_first_bit() {
        let local = NodeId::new([0u8; NODE_ID_LEN]);
        let mut remote_bytes = [0u8; NODE_ID_LEN];
        remote_bytes[0] = 0x80;
        assert_eq!(bucket_index(&local, &NodeId::new(remote_bytes)), Some(0));
    }

    #[test]
    fn test_bucket_index_last_bit() {
        let local = NodeId::new([0u8; NODE_ID_LEN]);
        let mut remote_bytes = [0u8; NODE_ID_LEN];
        remote_bytes[NODE_ID_LEN - 1] = 0x01;
        assert_eq!(bucket_index(&local, &NodeId::new(remote_bytes)), Some(159));
    }

    #[test]
    fn test_bucket_index_matches_highest_differing_bit() {
        let local = NodeId::new([0u8; NODE_ID_LEN]);
        for byte in 0..NODE_ID_LEN {
            for bit in 0..8 {
                let mut remote_bytes = [0u8; NODE_ID_LEN];
                remote_bytes[byte] = 0x80 >> bit;
                // A lower-significance differing bit must not move the bucket
                if byte + 1 < NODE_ID_LEN {
                    remote_bytes[byte + 1] = 0xFF;
                }
                assert_eq!(
                    bucket_index(&local, &NodeId::new(remote_bytes)),
                    Some(byte * 8 + bit)
                );
            }
        }
    }
}
