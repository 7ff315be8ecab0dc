//! Outbound port: how the DHT reaches the network.

use crate::errors::DhtError;
use crate::node_id::NodeId;
use async_trait::async_trait;
use mesh_wire::SignedPeerInfo;
use std::net::SocketAddr;

/// Driver for Kademlia RPC traffic, implemented by the node core over its
/// UDP dispatch. Every call resolves on the matching response or fails
/// with `DhtError::RpcTimeout` after the RPC window.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// PING the endpoint; resolves with the responder's signed record.
    async fn ping(&self, addr: SocketAddr) -> Result<SignedPeerInfo, DhtError>;

    /// Ask the endpoint for its k closest records to `target`.
    async fn find_node(
        &self,
        addr: SocketAddr,
        target: NodeId,
    ) -> Result<Vec<SignedPeerInfo>, DhtError>;

    /// Push a record to the endpoint. STORE is fire-and-forget; Ok means
    /// the frame was handed to the transport.
    async fn store(&self, addr: SocketAddr, record: SignedPeerInfo) -> Result<(), DhtError>;
}
