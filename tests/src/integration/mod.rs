//! Cross-node integration scenarios.

pub mod dht;
pub mod gossip;
pub mod integrity;
pub mod two_node;

#[cfg(test)]
pub(crate) mod helpers {
    use mesh_node::{NodeConfig, NodeHandle, PeerSnapshot};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    /// Config for a same-host test node: loopback only, no STUN, fast
    /// gossip so scenarios converge quickly.
    pub fn localhost_config(name: &str) -> NodeConfig {
        let mut config = NodeConfig::new(name);
        config.force_localhost = true;
        config.stun_server = "disabled".to_string();
        config.gossip_interval = 1;
        config
    }

    /// Start a node with the standard test config, applying overrides.
    pub async fn start_node(name: &str, tweak: impl FnOnce(&mut NodeConfig)) -> NodeHandle {
        let mut config = localhost_config(name);
        tweak(&mut config);
        NodeHandle::start(config).await.expect("node start")
    }

    /// Seed `a` with `b`'s endpoint, triggering a handshake.
    pub async fn donate(a: &NodeHandle, b: &NodeHandle) {
        a.add_donor(IpAddr::V4(Ipv4Addr::LOCALHOST), b.public_addr().port())
            .await
            .expect("add_donor");
    }

    /// Poll until `predicate` holds over the node's peer snapshot, or
    /// panic after `timeout`.
    pub async fn wait_for_peers(
        node: &NodeHandle,
        what: &str,
        timeout: Duration,
        predicate: impl Fn(&[PeerSnapshot]) -> bool,
    ) {
        let deadline = Instant::now() + timeout;
        loop {
            let peers = node.peers().await.expect("peers");
            if predicate(&peers) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {what} on {}; table: {peers:?}",
                node.device_id()
            );
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// True when the snapshot lists `device` as authenticated.
    pub fn has_authenticated(peers: &[PeerSnapshot], device: &str) -> bool {
        peers
            .iter()
            .any(|p| p.device_id == device && p.authenticated)
    }
}
