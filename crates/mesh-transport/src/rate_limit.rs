//! Per-source-IP token bucket.

use std::collections::HashMap;
use std::net::IpAddr;

/// Token bucket limiter keyed by source IP.
///
/// Each source starts with a full bucket of `capacity` tokens; one token
/// is spent per datagram and `capacity` tokens drip back per
/// `window_secs`. A datagram arriving at an empty bucket is rejected.
/// Time is passed in by the caller (epoch milliseconds) so tests can run
/// on a fabricated clock.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: u32,
    window_ms: u64,
    buckets: HashMap<IpAddr, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    /// Tokens scaled by 1000 to keep refill math in integers
    millitokens: u64,
    last_refill_ms: u64,
}

impl TokenBucketLimiter {
    /// Create a limiter admitting `capacity` packets per `window_secs`
    /// per source IP.
    pub fn new(capacity: u32, window_secs: u64) -> Self {
        Self {
            capacity,
            window_ms: window_secs * 1000,
            buckets: HashMap::new(),
        }
    }

    /// Spend one token for `source`. Returns false when the source is over
    /// its budget and the datagram must be dropped.
    pub fn allow(&mut self, source: IpAddr, now_ms: u64) -> bool {
        let cap_milli = u64::from(self.capacity) * 1000;
        let window_ms = self.window_ms;

        let bucket = self.buckets.entry(source).or_insert(Bucket {
            millitokens: cap_milli,
            last_refill_ms: now_ms,
        });

        let elapsed = now_ms.saturating_sub(bucket.last_refill_ms);
        if elapsed > 0 {
            let refill = elapsed.saturating_mul(cap_milli) / window_ms;
            bucket.millitokens = (bucket.millitokens + refill).min(cap_milli);
            bucket.last_refill_ms = now_ms;
        }

        if bucket.millitokens >= 1000 {
            bucket.millitokens -= 1000;
            true
        } else {
            false
        }
    }

    /// Drop state for sources idle long enough to have refilled entirely.
    pub fn gc(&mut self, now_ms: u64) {
        let window_ms = self.window_ms;
        self.buckets
            .retain(|_, b| now_ms.saturating_sub(b.last_refill_ms) < window_ms);
    }

    /// Number of tracked sources.
    pub fn tracked_sources(&self) -> usize {
        self.buckets.len()
    }
}
