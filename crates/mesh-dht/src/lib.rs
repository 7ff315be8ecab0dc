//! # Mesh DHT - Kademlia Routing for the Overlay
//!
//! 160-bit node ids (SHA-1 of the device id), XOR distance, k-buckets of
//! K=20 signed peer records, and the iterative FIND_NODE lookup.
//!
//! The domain layer (`node_id`, `bucket`, `table`) performs no I/O. RPC
//! traffic is driven through the `RpcTransport` port, implemented by the
//! node core over its UDP dispatch.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod errors;
pub mod lookup;
pub mod node_id;
pub mod ports;
pub mod table;

// Re-exports
pub use bucket::KBucket;
pub use errors::DhtError;
pub use lookup::{iterative_find_node, RpcIdSequence};
pub use node_id::{bucket_index, xor_distance, Distance, NodeId};
pub use ports::RpcTransport;
pub use table::RoutingTable;

/// Bucket capacity and lookup return-set size.
pub const K: usize = 20;

/// Number of k-buckets, one per id bit.
pub const NUM_BUCKETS: usize = 160;

/// How long an outstanding RPC waits for its response.
pub const RPC_TIMEOUT_SECS: u64 = 5;
