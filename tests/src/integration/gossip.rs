//! Gossip convergence and inactivity cleanup scenarios.

#[cfg(test)]
mod tests {
    use crate::integration::helpers::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_line_topology_converges_to_full_mesh_tables() {
        // a - b - c - d, each seeded only with its right-hand neighbor.
        let a = start_node("line-a", |_| {}).await;
        let b = start_node("line-b", |_| {}).await;
        let c = start_node("line-c", |_| {}).await;
        let d = start_node("line-d", |_| {}).await;

        donate(&a, &b).await;
        donate(&b, &c).await;
        donate(&c, &d).await;

        let everyone = ["line-a", "line-b", "line-c", "line-d"];
        for node in [&a, &b, &c, &d] {
            wait_for_peers(node, "full mesh", Duration::from_secs(15), |peers| {
                everyone
                    .iter()
                    .all(|id| peers.iter().any(|p| p.device_id == *id))
            })
            .await;
        }

        for node in [a, b, c, d] {
            node.stop().await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_inactive_authenticated_peer_is_swept() {
        // Aggressive timers: 1 s ACK ceiling, 2 s sweep.
        let a = start_node("sweep-a", |config| {
            config.message_timeout_seconds = 1;
            config.peer_cleanup_interval = 2;
            // Quiet gossip so nothing refreshes b's entry by accident;
            // heartbeats from b are the only thing keeping it alive.
            config.gossip_interval = 60;
        })
        .await;
        let b = start_node("sweep-b", |config| {
            config.gossip_interval = 60;
        })
        .await;

        donate(&a, &b).await;
        wait_for_peers(&a, "b authenticated", Duration::from_secs(10), |peers| {
            has_authenticated(peers, "sweep-b")
        })
        .await;

        b.stop().await;

        // Idle > 2 × message_timeout, swept within two cleanup periods.
        wait_for_peers(&a, "b evicted", Duration::from_secs(8), |peers| {
            !peers.iter().any(|p| p.device_id == "sweep-b")
        })
        .await;

        a.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unauthenticated_peer_survives_sweep() {
        use mesh_wire::{Envelope, EnvelopeKind};
        use std::net::{IpAddr, Ipv4Addr, SocketAddr};
        use tokio::net::UdpSocket;

        let a = start_node("sweep-a", |config| {
            config.message_timeout_seconds = 1;
            config.peer_cleanup_interval = 1;
        })
        .await;

        // One raw datagram lists a stranger, unauthenticated.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let envelope = Envelope::new(
            EnvelopeKind::Heartbeat,
            "stranger",
            Some("sweep-a".to_string()),
            vec![],
            0,
        );
        socket
            .send_to(
                &envelope.encode(),
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), a.public_addr().port()),
            )
            .await
            .unwrap();

        wait_for_peers(&a, "stranger listed", Duration::from_secs(3), |peers| {
            peers.iter().any(|p| p.device_id == "stranger")
        })
        .await;

        // Well past 2 × message_timeout; the unauthenticated entry stays.
        tokio::time::sleep(Duration::from_secs(4)).await;
        let peers = a.peers().await.unwrap();
        assert!(peers.iter().any(|p| p.device_id == "stranger"));

        a.stop().await;
    }
}
