//! Peer events, fanned out on a broadcast channel.
//!
//! Subscribers each consume their own copy; a slow subscriber lags and
//! loses the oldest events rather than blocking the dispatch task.

use tokio::sync::broadcast;

/// Depth of the event ring before lagging subscribers lose events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something observable happened to the peer set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// A peer entered the table (unauthenticated until a handshake)
    PeerAdded {
        /// Device id of the new peer
        device_id: String,
    },
    /// A handshake completed and a session key was installed
    PeerAuthenticated {
        /// Device id of the authenticated peer
        device_id: String,
    },
    /// The inactivity sweep evicted a peer
    PeerExpired {
        /// Device id of the evicted peer
        device_id: String,
    },
    /// A reliable send gave up
    MessageFailed {
        /// Intended recipient
        device_id: String,
        /// Sequence number of the abandoned envelope
        sequence: u32,
    },
    /// Content arrived in reply to a request
    ContentReceived {
        /// Identifier of the stored content
        content_id: String,
    },
}

/// Create the event channel at its standard capacity.
pub fn channel() -> broadcast::Sender<PeerEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
