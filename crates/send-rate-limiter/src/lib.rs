//! Outbound send-rate limiting over a shared counter store.
//!
//! Two fixed windows gate every send: a one-second bucket and a one-minute
//! bucket, both keyed by wall-clock truncation so the limiter carries no
//! state between calls and the buckets self-expire. Counters live in an
//! external store (Redis in production, in-memory for tests and
//! single-process deployments) so concurrent dispatcher instances coordinate
//! through the same ceilings.
//!
//! Reservation is a single atomic round trip: check every window, then
//! increment every window, never read-then-write. On a counter-store failure
//! the limiter fails closed (zero budget, reservations refused) and logs;
//! store errors never propagate to the dispatcher.

mod error;
mod limiter;
mod memory;
mod redis_store;
mod store;

pub use error::{CounterError, CounterResult};
pub use limiter::{RateLimiter, RateLimiterConfig, WindowCounts};
pub use memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use store::{CounterStore, WindowReservation};
