//! # Mesh Transport - UDP Plumbing for the Overlay
//!
//! One IPv4 UDP socket per node. Outbound sends go through
//! `UdpTransport::send`; inbound datagrams pass the per-source rate gate
//! and arrive on an mpsc stream. STUN binding requests share the same
//! socket (so the mapped port is the overlay port) and are demultiplexed
//! from overlay traffic by the RFC 5389 magic cookie.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod rate_limit;
pub mod stun;
pub mod udp;

// Re-exports
pub use errors::TransportError;
pub use rate_limit::TokenBucketLimiter;
pub use udp::UdpTransport;

/// Inbound channel depth before datagrams are shed.
pub const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Rate-limit window per source IP.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 10;

/// Packets admitted per source IP per window.
pub const RATE_LIMIT_PACKETS: u32 = 10;
