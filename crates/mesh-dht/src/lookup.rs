//! Iterative FIND_NODE lookup.
//!
//! Each round queries every not-yet-queried candidate in parallel, merges
//! the verified replies (dedup by device id), re-sorts by XOR distance to
//! the target, truncates to k, and stops once a full round adds nothing
//! new. The result may hold fewer than k records in a small network.

use crate::errors::DhtError;
use crate::node_id::{xor_distance, NodeId};
use crate::ports::RpcTransport;
use mesh_wire::SignedPeerInfo;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// Monotonic allocator for 32-bit RPC correlation ids.
#[derive(Debug, Default)]
pub struct RpcIdSequence(AtomicU32);

impl RpcIdSequence {
    /// Create a sequence starting at zero.
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// The next id, wrapping modulo 2^32.
    pub fn next_id(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

fn sort_and_truncate(candidates: &mut Vec<SignedPeerInfo>, target: &NodeId, k: usize) {
    candidates.sort_by_key(|record| {
        xor_distance(&NodeId::from_device_id(&record.device_id), target)
    });
    candidates.dedup_by(|a, b| a.device_id == b.device_id);
    candidates.truncate(k);
}

/// Run the iterative lookup for `target`, seeded with the local table's
/// closest records.
pub async fn iterative_find_node(
    seed: Vec<SignedPeerInfo>,
    target: NodeId,
    transport: Arc<dyn RpcTransport>,
    k: usize,
) -> Vec<SignedPeerInfo> {
    let mut candidates = seed;
    sort_and_truncate(&mut candidates, &target, k);

    let mut queried: HashSet<String> = HashSet::new();

    loop {
        let round: Vec<SignedPeerInfo> = candidates
            .iter()
            .filter(|record| !queried.contains(&record.device_id))
            .cloned()
            .collect();
        if round.is_empty() {
            break;
        }

        let mut join_set = JoinSet::new();
        for record in round {
            queried.insert(record.device_id.clone());
            let transport = Arc::clone(&transport);
            let addr = record.socket_addr();
            join_set.spawn(async move { transport.find_node(addr, target).await });
        }

        let mut added_any = false;
        while let Some(joined) = join_set.join_next().await {
            let replies = match joined {
                Ok(Ok(replies)) => replies,
                Ok(Err(DhtError::RpcTimeout { rpc_id })) => {
                    trace!(rpc_id, "lookup query timed out");
                    continue;
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "lookup query failed");
                    continue;
                }
                Err(_) => continue,
            };

            for reply in replies {
                if reply.verify().is_err() {
                    debug!(peer = %reply.device_id, "dropping unverifiable lookup reply");
                    continue;
                }
                if !candidates.iter().any(|c| c.device_id == reply.device_id) {
                    candidates.push(reply);
                    added_any = true;
                }
            }
        }

        sort_and_truncate(&mut candidates, &target, k);

        if !added_any {
            break;
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mesh_crypto::NodeIdentity;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn signed(name: &str, port: u16) -> SignedPeerInfo {
        let identity = NodeIdentity::new(name);
        SignedPeerInfo::for_identity(&identity, IpAddr::V4(Ipv4Addr::LOCALHOST), port, 1)
    }

    /// In-memory network: each endpoint answers FIND_NODE with a fixed set.
    struct StaticNetwork {
        replies: HashMap<SocketAddr, Vec<SignedPeerInfo>>,
        queries: Mutex<Vec<SocketAddr>>,
    }

    #[async_trait]
    impl RpcTransport for StaticNetwork {
        async fn ping(&self, _addr: SocketAddr) -> Result<SignedPeerInfo, DhtError> {
            Err(DhtError::Transport("not under test".into()))
        }

        async fn find_node(
            &self,
            addr: SocketAddr,
            _target: NodeId,
        ) -> Result<Vec<SignedPeerInfo>, DhtError> {
            self.queries.lock().push(addr);
            self.replies
                .get(&addr)
                .cloned()
                .ok_or(DhtError::RpcTimeout { rpc_id: 0 })
        }

        async fn store(
            &self,
            _addr: SocketAddr,
            _record: SignedPeerInfo,
        ) -> Result<(), DhtError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lookup_discovers_transitive_peers() {
        // a knows b, b knows c; looking anything up from {a} must surface c.
        let a = signed("a", 4000);
        let b = signed("b", 4001);
        let c = signed("c", 4002);

        let mut replies = HashMap::new();
        replies.insert(a.socket_addr(), vec![b.clone()]);
        replies.insert(b.socket_addr(), vec![c.clone()]);
        replies.insert(c.socket_addr(), vec![]);

        let network = Arc::new(StaticNetwork {
            replies,
            queries: Mutex::new(Vec::new()),
        });

        let found = iterative_find_node(
            vec![a.clone()],
            NodeId::from_device_id("c"),
            network.clone(),
            20,
        )
        .await;

        let names: Vec<&str> = found.iter().map(|r| r.device_id.as_str()).collect();
        assert!(names.contains(&"b"));
        assert!(names.contains(&"c"));
    }

    #[tokio::test]
    async fn test_lookup_queries_each_peer_once() {
        let a = signed("a", 4000);
        let b = signed("b", 4001);

        let mut replies = HashMap::new();
        replies.insert(a.socket_addr(), vec![b.clone(), a.clone()]);
        replies.insert(b.socket_addr(), vec![a.clone(), b.clone()]);

        let network = Arc::new(StaticNetwork {
            replies,
            queries: Mutex::new(Vec::new()),
        });

        iterative_find_node(
            vec![a.clone()],
            NodeId::from_device_id("target"),
            network.clone(),
            20,
        )
        .await;

        let queries = network.queries.lock();
        let a_count = queries.iter().filter(|&&q| q == a.socket_addr()).count();
        let b_count = queries.iter().filter(|&&q| q == b.socket_addr()).count();
        assert_eq!(a_count, 1);
        assert_eq!(b_count, 1);
    }

    #[tokio::test]
    async fn test_lookup_drops_unverifiable_replies() {
        let a = signed("a", 4000);
        let forged = SignedPeerInfo::unsigned("forged", Ipv4Addr::LOCALHOST, 6666);

        let mut replies = HashMap::new();
        replies.insert(a.socket_addr(), vec![forged]);

        let network = Arc::new(StaticNetwork {
            replies,
            queries: Mutex::new(Vec::new()),
        });

        let found = iterative_find_node(
            vec![a.clone()],
            NodeId::from_device_id("anything"),
            network,
            20,
        )
        .await;

        assert!(found.iter().all(|r| r.device_id != "forged"));
    }

    #[tokio::test]
    async fn test_lookup_truncates_to_k() {
        let seed = signed("seed", 4000);
        let flood: Vec<SignedPeerInfo> =
            (0..30).map(|i| signed(&format!("n{i}"), 5000 + i)).collect();

        let mut replies = HashMap::new();
        replies.insert(seed.socket_addr(), flood.clone());
        for record in &flood {
            replies.insert(record.socket_addr(), vec![]);
        }

        let network = Arc::new(StaticNetwork {
            replies,
            queries: Mutex::new(Vec::new()),
        });

        let found = iterative_find_node(
            vec![seed],
            NodeId::from_device_id("target"),
            network,
            20,
        )
        .await;

        assert_eq!(found.len(), 20);
    }
}
