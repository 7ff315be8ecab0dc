//! Wire-integrity scenarios driven by a raw socket playing a scripted
//! peer: checksum NACKs, duplicate suppression, and session enforcement.

#[cfg(test)]
mod tests {
    use crate::integration::helpers::*;
    use mesh_node::{NodeError, NodeHandle};
    use mesh_wire::{Envelope, EnvelopeKind};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    /// A scripted peer: a bare socket that speaks raw envelopes.
    struct RawPeer {
        socket: UdpSocket,
        device_id: String,
        sequence: u32,
    }

    impl RawPeer {
        async fn new(device_id: &str) -> Self {
            Self {
                socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
                device_id: device_id.to_string(),
                sequence: 0,
            }
        }

        fn data_envelope(&mut self, to: &str, payload: &[u8]) -> Envelope {
            let envelope = Envelope::new(
                EnvelopeKind::Data,
                self.device_id.clone(),
                Some(to.to_string()),
                payload.to_vec(),
                self.sequence,
            );
            self.sequence += 1;
            envelope
        }

        async fn send_to(&self, node: &NodeHandle, bytes: &[u8]) {
            let dest = SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                node.public_addr().port(),
            );
            self.socket.send_to(bytes, dest).await.unwrap();
        }

        async fn recv_envelope(&self) -> Option<Envelope> {
            let mut buf = vec![0u8; 65_507];
            let (len, _) = timeout(Duration::from_secs(3), self.socket.recv_from(&mut buf))
                .await
                .ok()?
                .ok()?;
            Envelope::decode(&buf[..len]).ok()
        }

        /// Receive until an envelope of `kind` arrives or the window ends.
        async fn recv_kind(&self, kind: EnvelopeKind) -> Option<Envelope> {
            for _ in 0..10 {
                let envelope = self.recv_envelope().await?;
                if envelope.kind == kind {
                    return Some(envelope);
                }
            }
            None
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_corrupted_payload_draws_nack_and_no_delivery() {
        let node = start_node("node-a", |_| {}).await;
        let mut messages = node.messages().unwrap();
        let mut mallory = RawPeer::new("mallory").await;

        // Seal a valid envelope, then flip one payload byte while keeping
        // the original checksum.
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
        let envelope = mallory.data_envelope("node-a", b"legit payload");
        let mut raw = serde_json::to_value(&envelope).unwrap();
        let mut bytes = b"legit payload".to_vec();
        bytes[0] ^= 0x01;
        raw["payload"] = serde_json::Value::String(BASE64.encode(&bytes));
        mallory
            .send_to(&node, serde_json::to_string(&raw).unwrap().as_bytes())
            .await;

        let nack = mallory
            .recv_kind(EnvelopeKind::Nack)
            .await
            .expect("expected a NACK");
        let (byte, reason) = nack.nack_contents().expect("nack payload");
        assert_eq!(byte, (envelope.sequence_number & 0xFF) as u8);
        assert!(reason.contains("checksum"));

        // Nothing reaches the application.
        assert!(
            timeout(Duration::from_millis(500), messages.recv())
                .await
                .is_err()
        );
        assert_eq!(node.metrics().checksum_mismatch, 1);

        node.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_data_delivers_once_and_acks_twice() {
        let node = start_node("node-a", |_| {}).await;
        let mut messages = node.messages().unwrap();
        let mut mallory = RawPeer::new("mallory").await;

        let envelope = mallory.data_envelope("node-a", b"hello once");
        let bytes = envelope.encode();
        mallory.send_to(&node, &bytes).await;
        assert!(mallory.recv_kind(EnvelopeKind::Ack).await.is_some());

        mallory.send_to(&node, &bytes).await;
        assert!(mallory.recv_kind(EnvelopeKind::Ack).await.is_some());

        let delivered = timeout(Duration::from_secs(2), messages.recv())
            .await
            .expect("first delivery")
            .unwrap();
        assert_eq!(delivered.payload, b"hello once");

        // The duplicate was ACKed but never re-delivered.
        assert!(
            timeout(Duration::from_millis(500), messages.recv())
                .await
                .is_err()
        );
        assert_eq!(node.metrics().duplicates, 1);

        node.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_encrypt_to_unauthenticated_peer_is_refused() {
        let node = start_node("node-a", |_| {}).await;
        let mut mallory = RawPeer::new("mallory").await;

        // One plain envelope puts mallory in the table, unauthenticated.
        let envelope = mallory.data_envelope("node-a", b"hi");
        mallory.send_to(&node, &envelope.encode()).await;
        assert!(mallory.recv_kind(EnvelopeKind::Ack).await.is_some());

        assert!(matches!(
            node.send("mallory", b"secret".to_vec(), true, true).await,
            Err(NodeError::NoSession(_))
        ));

        node.stop().await;
    }
}
