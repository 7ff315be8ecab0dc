//! Two-node scenarios: handshake, reliable encrypted send, and failure
//! surfacing when the remote goes away.

#[cfg(test)]
mod tests {
    use crate::integration::helpers::*;
    use mesh_node::NodeError;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_seeded_nodes_authenticate_and_exchange() {
        let a = start_node("node-a", |_| {}).await;
        let b = start_node("node-b", |_| {}).await;
        let mut b_messages = b.messages().unwrap();

        donate(&a, &b).await;

        // Both directions authenticated within the ten-second budget.
        wait_for_peers(&a, "b authenticated", Duration::from_secs(10), |peers| {
            has_authenticated(peers, "node-b")
        })
        .await;
        wait_for_peers(&b, "a authenticated", Duration::from_secs(10), |peers| {
            has_authenticated(peers, "node-a")
        })
        .await;

        // Encrypted, ACK-required application send.
        a.send("node-b", b"hi".to_vec(), true, true)
            .await
            .expect("reliable send");

        let received = timeout(Duration::from_secs(5), b_messages.recv())
            .await
            .expect("delivery timeout")
            .expect("stream open");
        assert_eq!(received.from, "node-a");
        assert_eq!(received.payload, b"hi");

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_to_stopped_peer_fails_and_drains() {
        let a = start_node("node-a", |config| {
            config.message_timeout_seconds = 5;
        })
        .await;
        let b = start_node("node-b", |_| {}).await;

        donate(&a, &b).await;
        wait_for_peers(&a, "b authenticated", Duration::from_secs(10), |peers| {
            has_authenticated(peers, "node-b")
        })
        .await;

        b.stop().await;

        let started = tokio::time::Instant::now();
        let result = a.send("node-b", b"hi".to_vec(), true, false).await;
        assert!(matches!(
            result,
            Err(NodeError::AckTimeout) | Err(NodeError::MaxRetriesExceeded)
        ));
        assert!(started.elapsed() <= Duration::from_secs(9));

        assert_eq!(a.pending_messages().await.unwrap(), 0);
        assert!(a.metrics().send_failures >= 1);

        a.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_to_unknown_peer_fails_fast() {
        let a = start_node("node-a", |_| {}).await;

        assert!(matches!(
            a.send("node-zz", b"hi".to_vec(), true, true).await,
            Err(NodeError::PeerUnknown(_))
        ));

        a.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unencrypted_unacked_send_is_fire_and_forget() {
        let a = start_node("node-a", |_| {}).await;
        let b = start_node("node-b", |_| {}).await;
        let mut b_messages = b.messages().unwrap();

        donate(&a, &b).await;
        wait_for_peers(&a, "b authenticated", Duration::from_secs(10), |peers| {
            has_authenticated(peers, "node-b")
        })
        .await;

        a.send("node-b", b"plain".to_vec(), false, false)
            .await
            .expect("fire and forget");
        assert_eq!(a.pending_messages().await.unwrap(), 0);

        let received = timeout(Duration::from_secs(5), b_messages.recv())
            .await
            .expect("delivery timeout")
            .expect("stream open");
        assert_eq!(received.payload, b"plain");

        a.stop().await;
        b.stop().await;
    }
}
