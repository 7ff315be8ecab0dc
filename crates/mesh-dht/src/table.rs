//! The Kademlia routing table: 160 k-buckets of signed peer records.

use crate::bucket::{BucketEntry, KBucket};
use crate::errors::DhtError;
use crate::node_id::{bucket_index, xor_distance, NodeId};
use crate::{K, NUM_BUCKETS};
use mesh_wire::SignedPeerInfo;
use tracing::debug;

/// Routing table keyed by XOR distance from the local node id.
///
/// Every record admitted here has already passed signature verification;
/// `insert` re-checks as the last line of defense. The table is owned by
/// the node's dispatch task (single writer); readers get cloned snapshots.
#[derive(Debug)]
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<KBucket>,
    k: usize,
}

impl RoutingTable {
    /// Create an empty table around the local id.
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            buckets: (0..NUM_BUCKETS).map(|_| KBucket::new()).collect(),
            k: K,
        }
    }

    /// The local node id.
    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// Total records across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(KBucket::len).sum()
    }

    /// Check if the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(KBucket::is_empty)
    }

    /// Verify and insert a record. Returns the evicted entry when the
    /// target bucket overflowed.
    ///
    /// # Errors
    ///
    /// `DhtError::InvalidRecord` when the signature does not verify;
    /// `DhtError::SelfInsertion` for our own id.
    pub fn insert(&mut self, record: SignedPeerInfo) -> Result<Option<SignedPeerInfo>, DhtError> {
        record.verify()?;

        let node_id = NodeId::from_device_id(&record.device_id);
        let Some(index) = bucket_index(&self.local_id, &node_id) else {
            return Err(DhtError::SelfInsertion);
        };

        let evicted = self.buckets[index].upsert(BucketEntry { node_id, record }, self.k);
        if let Some(ref entry) = evicted {
            debug!(
                bucket = index,
                evicted = %entry.record.device_id,
                "k-bucket overflow, dropped least recently added peer"
            );
        }
        Ok(evicted.map(|e| e.record))
    }

    /// Remove a record by device id.
    pub fn remove(&mut self, device_id: &str) -> Option<SignedPeerInfo> {
        let node_id = NodeId::from_device_id(device_id);
        let index = bucket_index(&self.local_id, &node_id)?;
        self.buckets[index].remove(&node_id).map(|e| e.record)
    }

    /// Check if a device id is present.
    pub fn contains(&self, device_id: &str) -> bool {
        let node_id = NodeId::from_device_id(device_id);
        bucket_index(&self.local_id, &node_id)
            .map(|index| self.buckets[index].contains(&node_id))
            .unwrap_or(false)
    }

    /// The up-to-`count` records closest to `target`, nearest first.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<SignedPeerInfo> {
        let mut all: Vec<(crate::Distance, &BucketEntry)> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries().iter())
            .map(|e| (xor_distance(&e.node_id, target), e))
            .collect();

        all.sort_by(|a, b| a.0.cmp(&b.0));

        all.into_iter()
            .take(count)
            .map(|(_, e)| e.record.clone())
            .collect()
    }

    /// Snapshot every record in the table.
    pub fn all_records(&self) -> Vec<SignedPeerInfo> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries().iter())
            .map(|e| e.record.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_crypto::NodeIdentity;
    use std::net::{IpAddr, Ipv4Addr};

    fn signed(name: &str, port: u16) -> SignedPeerInfo {
        let identity = NodeIdentity::new(name);
        SignedPeerInfo::for_identity(&identity, IpAddr::V4(Ipv4Addr::LOCALHOST), port, 1)
    }

    fn table() -> RoutingTable {
        RoutingTable::new(NodeId::from_device_id("local"))
    }

    #[test]
    fn test_insert_places_by_differing_bit() {
        let mut table = table();
        table.insert(signed("remote-1", 4001)).unwrap();

        let local = NodeId::from_device_id("local");
        let remote = NodeId::from_device_id("remote-1");
        let expected = bucket_index(&local, &remote).unwrap();

        assert!(table.buckets[expected].contains(&remote));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unsigned_record_rejected() {
        let mut table = table();
        let record = SignedPeerInfo::unsigned("bogus", Ipv4Addr::LOCALHOST, 4000);
        assert!(table.insert(record).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_self_insertion_rejected() {
        let mut table = table();
        let record = signed("local", 4000);
        assert!(matches!(
            table.insert(record),
            Err(DhtError::SelfInsertion)
        ));
    }

    #[test]
    fn test_tampered_record_rejected() {
        let mut table = table();
        let mut record = signed("remote-1", 4001);
        record.port = 9999;
        assert!(table.insert(record).is_err());
    }

    #[test]
    fn test_find_closest_orders_by_distance() {
        let mut table = table();
        for i in 0..10 {
            table.insert(signed(&format!("remote-{i}"), 4000 + i)).unwrap();
        }

        let target = NodeId::from_device_id("remote-3");
        let closest = table.find_closest(&target, 5);

        assert_eq!(closest.len(), 5);
        assert_eq!(closest[0].device_id, "remote-3");
        for pair in closest.windows(2) {
            let d0 = xor_distance(&NodeId::from_device_id(&pair[0].device_id), &target);
            let d1 = xor_distance(&NodeId::from_device_id(&pair[1].device_id), &target);
            assert!(d0 < d1);
        }
    }

    #[test]
    fn test_find_closest_returns_fewer_when_small() {
        let mut table = table();
        table.insert(signed("remote-1", 4001)).unwrap();

        let closest = table.find_closest(&NodeId::from_device_id("anything"), 20);
        assert_eq!(closest.len(), 1);
    }

    #[test]
    fn test_reinsert_same_device_does_not_grow() {
        let mut table = table();
        table.insert(signed("remote-1", 4001)).unwrap();
        table.insert(signed("remote-1", 4002)).unwrap();

        assert_eq!(table.len(), 1);
    }
}
