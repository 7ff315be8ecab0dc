//! Gossip round planning.
//!
//! Every `gossip_interval` the node sends a snapshot of its peer table to
//! a few random authenticated peers. Authenticated peers not picked this
//! round get a HEARTBEAT instead, keeping their NAT bindings and
//! last-seen entries warm. Merging happens in the peer table; the
//! dispatch task owns the sending.

use crate::peer_table::{Peer, PeerTable};
use chrono::Utc;
use mesh_wire::GossipSnapshot;

/// One planned fan-out round.
pub struct GossipRound {
    /// Peers receiving the full snapshot
    pub targets: Vec<Peer>,
    /// Authenticated peers receiving only a heartbeat
    pub heartbeats: Vec<Peer>,
    /// The snapshot to send
    pub snapshot: GossipSnapshot,
}

/// Plan a round: up to `fanout` random authenticated targets, heartbeats
/// for the rest. Returns None when there is no one to talk to.
pub fn plan_round(table: &PeerTable, fanout: usize) -> Option<GossipRound> {
    let targets = table.random_authenticated(fanout);
    if targets.is_empty() {
        return None;
    }

    let heartbeats = table
        .authenticated_peers()
        .into_iter()
        .filter(|p| !targets.iter().any(|t| t.device_id == p.device_id))
        .collect();

    Some(GossipRound {
        targets,
        heartbeats,
        snapshot: GossipSnapshot {
            peers: table.gossip_entries(),
            timestamp: Utc::now(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_crypto::{NodeIdentity, SessionCipher, SessionKey};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    fn table_with_authenticated(count: usize) -> PeerTable {
        let mut table = PeerTable::new("self", false);
        table.insert_self(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000, 0);

        let key = NodeIdentity::new("x").signing_public();
        for i in 0..count {
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4100 + i as u16);
            let id = format!("kiosk-{i}");
            table.observe(&id, addr, 0);
            let session = Arc::new(SessionCipher::new(&SessionKey::generate()));
            table.install_session(&id, addr, key, session, 0);
        }
        table
    }

    #[test]
    fn test_no_round_without_authenticated_peers() {
        let mut table = PeerTable::new("self", false);
        table.insert_self(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000, 0);
        table.observe(
            "stranger",
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4100),
            0,
        );

        assert!(plan_round(&table, 3).is_none());
    }

    #[test]
    fn test_fanout_bounded() {
        let table = table_with_authenticated(8);
        let round = plan_round(&table, 3).unwrap();

        assert_eq!(round.targets.len(), 3);
        assert_eq!(round.heartbeats.len(), 5);
    }

    #[test]
    fn test_targets_and_heartbeats_disjoint() {
        let table = table_with_authenticated(6);
        let round = plan_round(&table, 3).unwrap();

        for target in &round.targets {
            assert!(!round
                .heartbeats
                .iter()
                .any(|h| h.device_id == target.device_id));
        }
    }

    #[test]
    fn test_snapshot_covers_whole_table() {
        let table = table_with_authenticated(4);
        let round = plan_round(&table, 2).unwrap();

        // 4 peers + self
        assert_eq!(round.snapshot.peers.len(), 5);
    }
}
