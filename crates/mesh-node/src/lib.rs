//! # Mesh Node - The Overlay Node Core
//!
//! Composes the transport, wire formats, crypto, and DHT into a running
//! overlay node. One node = one task tree behind a [`NodeHandle`]; the
//! application talks to it exclusively through typed channels (commands
//! in, delivered messages and peer events out). The peer table and
//! routing table live inside the dispatch task: single writer, readers
//! get defensive copies.
//!
//! ## Subsystems
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `peer_table` | Known peers, authentication flags, inactivity sweep |
//! | `reliability` | ACK/NACK tracking, retransmission, duplicate cache |
//! | `auth` | Challenge/response handshake with session-key install |
//! | `gossip` | Periodic peer-table fan-out and merge |
//! | `content` | In-memory content store and announcement flow |
//! | `dht_service` | RPC plumbing driving `mesh-dht` lookups |
//! | `node` | The dispatch loop, timers, and the public handle |

#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod content;
pub mod dht_service;
pub mod error;
pub mod events;
pub mod gossip;
pub mod metrics;
pub mod node;
pub mod peer_table;
pub mod reliability;

// Re-exports
pub use config::NodeConfig;
pub use error::NodeError;
pub use events::PeerEvent;
pub use metrics::MetricsSnapshot;
pub use node::{NodeHandle, ReceivedMessage};
pub use peer_table::PeerSnapshot;

/// Reliability tick driving retransmissions.
pub const RETRANSMIT_TICK_MS: u64 = 500;

/// Spacing between retransmissions of one pending message.
pub const RETRANSMIT_INTERVAL_MS: u64 = 2_000;

/// Retransmissions after the initial send before giving up.
pub const MAX_RETRIES: u8 = 3;
