//! The counter-store abstraction the limiter reserves against.

use crate::CounterResult;
use async_trait::async_trait;
use std::time::Duration;

/// One window of a reservation: a bucket key, its ceiling and its TTL.
#[derive(Debug, Clone)]
pub struct WindowReservation {
    /// Bucket key, e.g. `send:sec:1735689600`.
    pub key: String,
    /// Maximum admissions within the bucket.
    pub limit: u64,
    /// Expiry applied to the bucket on increment.
    pub ttl: Duration,
}

/// Shared atomic counter store.
///
/// Implementations must make `reserve` atomic across ALL windows: admit only
/// if every window has headroom, then increment every window. Two concurrent
/// callers must never both pass the check and push a count past its ceiling.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically reserve one slot in every window. Returns whether the
    /// reservation was admitted.
    async fn reserve(&self, windows: &[WindowReservation]) -> CounterResult<bool>;

    /// Read one counter. An absent or expired key reads as zero.
    async fn get(&self, key: &str) -> CounterResult<u64>;
}
