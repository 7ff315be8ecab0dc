//! RPC plumbing between the DHT domain and the UDP dispatch.
//!
//! `RpcClient` implements the DHT's outbound port: it frames RPCs into
//! DATA envelopes, tracks outstanding requests by correlation id, and
//! resolves them when the dispatch task routes a PONG or FOUND_NODE back
//! through `resolve_response`. No retry; an unanswered RPC times out
//! after five seconds.

use async_trait::async_trait;
use chrono::Utc;
use mesh_crypto::NodeIdentity;
use mesh_dht::{iterative_find_node, DhtError, NodeId, RpcIdSequence, RpcTransport, K, RPC_TIMEOUT_SECS};
use mesh_transport::UdpTransport;
use mesh_wire::{AppPayload, Envelope, EnvelopeKind, RpcMessage, SignedPeerInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Outstanding RPCs awaiting their response frame.
pub type PendingRpcs = Arc<Mutex<HashMap<u32, oneshot::Sender<RpcMessage>>>>;

/// Route a response frame to its waiter. Returns false for frames nobody
/// is waiting on (late or unsolicited).
pub fn resolve_response(pending: &PendingRpcs, message: RpcMessage) -> bool {
    let Some(waiter) = pending.lock().remove(&message.rpc_id()) else {
        trace!(rpc_id = message.rpc_id(), "response with no waiter");
        return false;
    };
    waiter.send(message).is_ok()
}

/// Outbound DHT driver over the node's socket.
pub struct RpcClient {
    identity: Arc<NodeIdentity>,
    transport: UdpTransport,
    sequence: Arc<AtomicU32>,
    pending: PendingRpcs,
    rpc_ids: RpcIdSequence,
    advertised: SocketAddr,
    force_localhost: bool,
}

impl RpcClient {
    /// Build a client around the shared socket state.
    pub fn new(
        identity: Arc<NodeIdentity>,
        transport: UdpTransport,
        sequence: Arc<AtomicU32>,
        pending: PendingRpcs,
        advertised: SocketAddr,
        force_localhost: bool,
    ) -> Self {
        Self {
            identity,
            transport,
            sequence,
            pending,
            rpc_ids: RpcIdSequence::new(),
            advertised,
            force_localhost,
        }
    }

    /// Allocate the next RPC correlation id.
    pub fn next_rpc_id(&self) -> u32 {
        self.rpc_ids.next_id()
    }

    fn normalize(&self, addr: SocketAddr) -> SocketAddr {
        if self.force_localhost {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        } else {
            addr
        }
    }

    /// Our signed record at the advertised endpoint, stamped with now.
    pub fn self_record(&self) -> SignedPeerInfo {
        SignedPeerInfo::for_identity(
            &self.identity,
            self.advertised.ip(),
            self.advertised.port(),
            Utc::now().timestamp_millis(),
        )
    }

    /// Frame and send one RPC message.
    pub async fn send_frame(&self, addr: SocketAddr, message: &RpcMessage) -> Result<(), DhtError> {
        let payload = AppPayload::Dht(message.encode()).encode();
        let envelope = Envelope::new(
            EnvelopeKind::Data,
            self.identity.device_id(),
            None,
            payload,
            self.sequence.fetch_add(1, Ordering::Relaxed),
        );
        self.transport
            .send(self.normalize(addr), &envelope.encode())
            .await
            .map_err(|e| DhtError::Transport(e.to_string()))
    }

    /// Send a request and wait for its response frame.
    async fn request(&self, addr: SocketAddr, message: RpcMessage) -> Result<RpcMessage, DhtError> {
        let rpc_id = message.rpc_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(rpc_id, tx);

        if let Err(e) = self.send_frame(addr, &message).await {
            self.pending.lock().remove(&rpc_id);
            return Err(e);
        }

        match tokio::time::timeout(Duration::from_secs(RPC_TIMEOUT_SECS), rx).await {
            Ok(Ok(response)) => Ok(response),
            // Waiter dropped on shutdown; a cancelled RPC reads as a timeout
            Ok(Err(_)) => Err(DhtError::RpcTimeout { rpc_id }),
            Err(_) => {
                self.pending.lock().remove(&rpc_id);
                Err(DhtError::RpcTimeout { rpc_id })
            }
        }
    }
}

#[async_trait]
impl RpcTransport for RpcClient {
    async fn ping(&self, addr: SocketAddr) -> Result<SignedPeerInfo, DhtError> {
        let message = RpcMessage::Ping {
            rpc_id: self.next_rpc_id(),
            sender: self.self_record(),
        };
        match self.request(addr, message).await? {
            RpcMessage::Pong { sender, .. } => {
                sender.verify()?;
                Ok(sender)
            }
            other => Err(DhtError::Transport(format!(
                "unexpected reply to PING: {other:?}"
            ))),
        }
    }

    async fn find_node(
        &self,
        addr: SocketAddr,
        target: NodeId,
    ) -> Result<Vec<SignedPeerInfo>, DhtError> {
        let message = RpcMessage::FindNode {
            rpc_id: self.next_rpc_id(),
            target: *target.as_bytes(),
        };
        match self.request(addr, message).await? {
            RpcMessage::FoundNode { peers, .. } => Ok(peers),
            other => Err(DhtError::Transport(format!(
                "unexpected reply to FIND_NODE: {other:?}"
            ))),
        }
    }

    async fn store(&self, addr: SocketAddr, record: SignedPeerInfo) -> Result<(), DhtError> {
        let message = RpcMessage::Store {
            rpc_id: self.next_rpc_id(),
            record,
        };
        self.send_frame(addr, &message).await
    }
}

/// DHT join: PING the donor, run a lookup for our own id to fill the
/// buckets, then publish our record to the k closest nodes found.
///
/// Returns every record learned along the way, for the dispatch task to
/// merge into its tables.
pub async fn join(
    client: Arc<RpcClient>,
    donor: SocketAddr,
    local_id: NodeId,
) -> Result<Vec<SignedPeerInfo>, DhtError> {
    let donor_record = client.ping(donor).await?;
    debug!(donor = %donor_record.device_id, "donor answered join ping");

    let transport: Arc<dyn RpcTransport> = client.clone();
    let mut found =
        iterative_find_node(vec![donor_record.clone()], local_id, transport, K).await;

    let own_record = client.self_record();
    for record in &found {
        if record.device_id == own_record.device_id {
            continue;
        }
        if let Err(e) = client.store(record.socket_addr(), own_record.clone()).await {
            debug!(peer = %record.device_id, error = %e, "store during join failed");
        }
    }

    if !found.iter().any(|r| r.device_id == donor_record.device_id) {
        found.push(donor_record);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_response_routes_by_rpc_id() {
        let pending: PendingRpcs = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().insert(42, tx);

        let routed = resolve_response(
            &pending,
            RpcMessage::FoundNode {
                rpc_id: 42,
                peers: vec![],
            },
        );

        assert!(routed);
        assert!(matches!(
            rx.try_recv(),
            Ok(RpcMessage::FoundNode { rpc_id: 42, .. })
        ));
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn test_resolve_response_ignores_unknown_id() {
        let pending: PendingRpcs = Arc::new(Mutex::new(HashMap::new()));
        assert!(!resolve_response(
            &pending,
            RpcMessage::FoundNode {
                rpc_id: 7,
                peers: vec![],
            },
        ));
    }
}
