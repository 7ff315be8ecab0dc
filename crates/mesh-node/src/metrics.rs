//! Drop and failure counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Node-level counters, incremented on the recovery paths that never
/// surface an error to the caller.
#[derive(Debug, Default)]
pub struct NodeMetrics {
    /// Datagrams that failed envelope parsing
    pub malformed: AtomicU64,
    /// Envelopes dropped on checksum mismatch (NACKed)
    pub checksum_mismatch: AtomicU64,
    /// Payloads or records dropped on signature failure
    pub signature_failure: AtomicU64,
    /// Encrypted payloads dropped for lack of a session key
    pub no_session: AtomicU64,
    /// Duplicate envelopes suppressed (re-ACKed, not re-delivered)
    pub duplicates: AtomicU64,
    /// Reliable sends that exhausted their retry budget or timed out
    pub send_failures: AtomicU64,
}

impl NodeMetrics {
    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            malformed: self.malformed.load(Ordering::Relaxed),
            checksum_mismatch: self.checksum_mismatch.load(Ordering::Relaxed),
            signature_failure: self.signature_failure.load(Ordering::Relaxed),
            no_session: self.no_session.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Plain-value view of [`NodeMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Datagrams that failed envelope parsing
    pub malformed: u64,
    /// Envelopes dropped on checksum mismatch
    pub checksum_mismatch: u64,
    /// Signature verification failures
    pub signature_failure: u64,
    /// Encrypted payloads without a session
    pub no_session: u64,
    /// Suppressed duplicates
    pub duplicates: u64,
    /// Failed reliable sends
    pub send_failures: u64,
}
