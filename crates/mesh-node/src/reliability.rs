//! ACK tracking, retransmission, and duplicate suppression.
//!
//! Outbound state machine per reliable message: `PENDING(retry=0)` →
//! resend every 2 s → `DONE(success)` on a matching ACK, `DONE(failure)`
//! after the third retransmission goes unanswered or when the per-message
//! timeout elapses, whichever comes first. A silent peer therefore sees
//! exactly four on-wire copies. Pending state is driven by the node's
//! 500 ms tick, not per-message timers.

use crate::error::NodeError;
use crate::{MAX_RETRIES, RETRANSMIT_INTERVAL_MS};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tracing::trace;

/// An outbound envelope awaiting its ACK.
pub struct PendingMessage {
    /// Recipient device id
    pub destination: String,
    /// Recipient endpoint at send time
    pub dest_addr: SocketAddr,
    /// Sequence number of the envelope
    pub sequence: u32,
    /// The encoded envelope, retained for retransmission
    pub bytes: Vec<u8>,
    /// First send time, epoch milliseconds
    pub first_send_ms: i64,
    /// Most recent (re)send time
    pub last_send_ms: i64,
    /// Retransmissions so far (0..=3)
    pub retries: u8,
    /// Completion for the caller blocked on this send
    pub responder: Option<oneshot::Sender<Result<(), NodeError>>>,
}

/// Work produced by one reliability tick.
#[derive(Default)]
pub struct TickOutcome {
    /// Envelopes to put back on the wire
    pub resends: Vec<(SocketAddr, Vec<u8>)>,
    /// Messages that exhausted their budget, with the error to surface
    pub failures: Vec<(PendingMessage, NodeError)>,
}

/// Tracks every outbound message that still owes us an ACK.
pub struct ReliabilityTracker {
    /// Oldest first; ACK matching takes the oldest hit
    pending: Vec<PendingMessage>,
    timeout_ms: i64,
}

impl ReliabilityTracker {
    /// Create a tracker with the configured ACK ceiling.
    pub fn new(timeout_ms: i64) -> Self {
        Self {
            pending: Vec::new(),
            timeout_ms,
        }
    }

    /// Number of messages still awaiting an ACK.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Track a freshly sent message.
    pub fn register(&mut self, message: PendingMessage) {
        self.pending.push(message);
    }

    /// Match an inbound ACK: the oldest pending message to the acking
    /// peer whose low sequence byte equals the ACK payload byte.
    pub fn on_ack(&mut self, from: &str, sequence_byte: u8) -> Option<PendingMessage> {
        let index = self
            .pending
            .iter()
            .position(|m| m.destination == from && (m.sequence & 0xFF) as u8 == sequence_byte)?;
        Some(self.pending.remove(index))
    }

    /// Advance the state machine. Call on every 500 ms tick.
    pub fn on_tick(&mut self, now_ms: i64) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let timeout_ms = self.timeout_ms;

        let mut index = 0;
        while index < self.pending.len() {
            let message = &mut self.pending[index];

            if now_ms.saturating_sub(message.first_send_ms) >= timeout_ms {
                let message = self.pending.remove(index);
                outcome.failures.push((message, NodeError::AckTimeout));
                continue;
            }

            if now_ms.saturating_sub(message.last_send_ms) >= RETRANSMIT_INTERVAL_MS as i64 {
                if message.retries >= MAX_RETRIES {
                    let message = self.pending.remove(index);
                    outcome
                        .failures
                        .push((message, NodeError::MaxRetriesExceeded));
                    continue;
                }
                message.retries += 1;
                message.last_send_ms = now_ms;
                trace!(
                    dest = %message.destination,
                    sequence = message.sequence,
                    retry = message.retries,
                    "retransmitting"
                );
                outcome
                    .resends
                    .push((message.dest_addr, message.bytes.clone()));
            }

            index += 1;
        }
        outcome
    }

    /// Remove every pending message (shutdown path).
    pub fn drain_all(&mut self) -> Vec<PendingMessage> {
        std::mem::take(&mut self.pending)
    }
}

/// Time-bounded cache of (sender, sequence) pairs for duplicate
/// suppression. Duplicates are re-ACKed but not re-delivered.
pub struct SeenCache {
    seen: HashMap<(String, u32), i64>,
    window_ms: i64,
}

impl SeenCache {
    /// Create a cache that forgets entries after `window_ms`.
    pub fn new(window_ms: i64) -> Self {
        Self {
            seen: HashMap::new(),
            window_ms,
        }
    }

    /// Record a sighting. Returns false when the pair was already seen
    /// inside the window (a duplicate).
    pub fn insert_if_new(&mut self, sender: &str, sequence: u32, now_ms: i64) -> bool {
        match self.seen.insert((sender.to_string(), sequence), now_ms) {
            None => true,
            Some(previous) => now_ms.saturating_sub(previous) >= self.window_ms,
        }
    }

    /// Drop entries past the window.
    pub fn gc(&mut self, now_ms: i64) {
        let window_ms = self.window_ms;
        self.seen
            .retain(|_, &mut seen_at| now_ms.saturating_sub(seen_at) < window_ms);
    }

    /// Entries currently tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn pending(dest: &str, sequence: u32, now_ms: i64) -> PendingMessage {
        PendingMessage {
            destination: dest.to_string(),
            dest_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4001),
            sequence,
            bytes: vec![1, 2, 3],
            first_send_ms: now_ms,
            last_send_ms: now_ms,
            retries: 0,
            responder: None,
        }
    }

    #[test]
    fn test_ack_completes_matching_message() {
        let mut tracker = ReliabilityTracker::new(30_000);
        tracker.register(pending("b", 0x0105, 0));

        assert!(tracker.on_ack("b", 0x05).is_some());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_ack_from_wrong_peer_ignored() {
        let mut tracker = ReliabilityTracker::new(30_000);
        tracker.register(pending("b", 5, 0));

        assert!(tracker.on_ack("c", 5).is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_ack_matches_oldest_first() {
        // Sequences 5 and 261 share the low byte 0x05.
        let mut tracker = ReliabilityTracker::new(30_000);
        tracker.register(pending("b", 5, 0));
        tracker.register(pending("b", 261, 10));

        let first = tracker.on_ack("b", 5).unwrap();
        assert_eq!(first.sequence, 5);
        let second = tracker.on_ack("b", 5).unwrap();
        assert_eq!(second.sequence, 261);
    }

    #[test]
    fn test_silent_peer_gets_exactly_four_copies() {
        let mut tracker = ReliabilityTracker::new(30_000);
        tracker.register(pending("b", 1, 0));

        let mut wire_copies = 1; // initial send
        let mut failed = false;

        // Drive the 500 ms tick for 10 simulated seconds.
        for tick in 1..=20 {
            let outcome = tracker.on_tick(tick * 500);
            wire_copies += outcome.resends.len();
            if !outcome.failures.is_empty() {
                assert!(matches!(
                    outcome.failures[0].1,
                    NodeError::MaxRetriesExceeded
                ));
                failed = true;
                break;
            }
        }

        assert!(failed);
        assert_eq!(wire_copies, 4);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_global_timeout_beats_retry_schedule() {
        // A 3 s ceiling fires before the retry budget is spent.
        let mut tracker = ReliabilityTracker::new(3_000);
        tracker.register(pending("b", 1, 0));

        let mut error = None;
        for tick in 1..=10 {
            let outcome = tracker.on_tick(tick * 500);
            if let Some((_, e)) = outcome.failures.into_iter().next() {
                error = Some(e);
                break;
            }
        }

        assert!(matches!(error, Some(NodeError::AckTimeout)));
    }

    #[test]
    fn test_retransmit_cadence_is_two_seconds() {
        let mut tracker = ReliabilityTracker::new(30_000);
        tracker.register(pending("b", 1, 0));

        assert!(tracker.on_tick(500).resends.is_empty());
        assert!(tracker.on_tick(1_500).resends.is_empty());
        assert_eq!(tracker.on_tick(2_000).resends.len(), 1);
        assert!(tracker.on_tick(2_500).resends.is_empty());
        assert_eq!(tracker.on_tick(4_000).resends.len(), 1);
    }

    #[test]
    fn test_seen_cache_flags_duplicates() {
        let mut cache = SeenCache::new(60_000);

        assert!(cache.insert_if_new("a", 7, 0));
        assert!(!cache.insert_if_new("a", 7, 100));
        assert!(cache.insert_if_new("a", 8, 100));
        assert!(cache.insert_if_new("b", 7, 100));
    }

    #[test]
    fn test_seen_cache_forgets_after_window() {
        let mut cache = SeenCache::new(1_000);

        assert!(cache.insert_if_new("a", 7, 0));
        assert!(cache.insert_if_new("a", 7, 1_500));

        cache.gc(10_000);
        assert_eq!(cache.len(), 1);
    }
}
