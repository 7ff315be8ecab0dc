//! DHT error types.

use thiserror::Error;

/// Errors from routing-table operations and RPC exchanges.
#[derive(Debug, Error)]
pub enum DhtError {
    /// Attempted to add the local node to its own routing table
    #[error("Cannot add local node to routing table")]
    SelfInsertion,

    /// A peer record failed signature verification
    #[error("Peer record rejected: {0}")]
    InvalidRecord(#[from] mesh_wire::WireError),

    /// No response arrived within the RPC window
    #[error("RPC {rpc_id} timed out")]
    RpcTimeout {
        /// Correlation id of the abandoned request
        rpc_id: u32,
    },

    /// The transport refused or failed the send
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The node is shutting down; outstanding RPCs are abandoned
    #[error("Node stopped")]
    Stopped,
}
