//! Five-node DHT join and lookup, plus the content announcement flow.

#[cfg(test)]
mod tests {
    use crate::integration::helpers::*;
    use mesh_dht::NodeId;
    use mesh_node::{NodeHandle, PeerEvent};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn start_cluster(count: usize) -> Vec<NodeHandle> {
        let mut nodes = Vec::with_capacity(count);
        for i in 0..count {
            nodes.push(
                start_node(&format!("dht-{i}"), |config| {
                    config.gossip_interval = 2;
                })
                .await,
            );
        }
        nodes
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_join_through_donor_makes_nodes_findable() {
        let nodes = start_cluster(5).await;
        let donor_port = nodes[0].public_addr().port();

        for node in &nodes[1..] {
            node.join(IpAddr::V4(Ipv4Addr::LOCALHOST), donor_port)
                .await
                .expect("join");
        }

        // Every node can locate every other by id with a matching endpoint.
        for from in &nodes {
            for target in &nodes {
                if from.device_id() == target.device_id() {
                    continue;
                }
                let found = from
                    .find_node(NodeId::from_device_id(target.device_id()))
                    .await
                    .expect("find_node");
                let record = found
                    .iter()
                    .find(|r| r.device_id == target.device_id())
                    .unwrap_or_else(|| {
                        panic!(
                            "{} could not find {}",
                            from.device_id(),
                            target.device_id()
                        )
                    });
                assert_eq!(record.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
                assert_eq!(record.port, target.public_addr().port());
            }
        }

        for node in nodes {
            node.stop().await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lookup_of_absent_id_returns_without_error() {
        let nodes = start_cluster(2).await;
        let donor_port = nodes[0].public_addr().port();
        nodes[1]
            .join(IpAddr::V4(Ipv4Addr::LOCALHOST), donor_port)
            .await
            .expect("join");

        let found = nodes[1]
            .find_node(NodeId::from_device_id("nobody-home"))
            .await
            .expect("find_node");
        assert!(found.iter().all(|r| r.device_id != "nobody-home"));

        for node in nodes {
            node.stop().await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_join_against_silent_donor_times_out() {
        let node = start_node("dht-lonely", |_| {}).await;

        // Nobody listens on this port.
        let result = node.join(IpAddr::V4(Ipv4Addr::LOCALHOST), 1).await;
        assert!(result.is_err());

        node.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_published_content_replicates_to_authenticated_peer() {
        let a = start_node("content-a", |_| {}).await;
        let b = start_node("content-b", |_| {}).await;
        let mut b_events = b.subscribe_events();

        donate(&a, &b).await;
        wait_for_peers(&a, "b authenticated", Duration::from_secs(10), |peers| {
            has_authenticated(peers, "content-b")
        })
        .await;

        a.publish_content("spring-campaign", vec![1, 2, 3, 4])
            .await
            .expect("publish");

        // b requests the announced id and stores the returned bytes.
        let received = timeout(Duration::from_secs(10), async {
            loop {
                match b_events.recv().await {
                    Ok(PeerEvent::ContentReceived { content_id }) => break content_id,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream closed: {e}"),
                }
            }
        })
        .await
        .expect("content replication timed out");
        assert_eq!(received, "spring-campaign");

        a.stop().await;
        b.stop().await;
    }
}
