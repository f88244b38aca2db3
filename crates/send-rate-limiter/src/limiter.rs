//! Two-window rate limiter.

use crate::{CounterResult, CounterStore, WindowReservation};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// TTLs slightly outlive their windows so a reservation at the bucket edge
/// still counts against late readers.
const SECOND_WINDOW_TTL: Duration = Duration::from_secs(2);
const MINUTE_WINDOW_TTL: Duration = Duration::from_secs(90);

/// Send-rate ceilings.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum sends within one wall-clock second.
    pub per_second: u64,
    /// Maximum sends within one wall-clock minute.
    pub per_minute: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            per_second: 10,
            per_minute: 300,
        }
    }
}

/// Read-only snapshot of the current buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub second: u64,
    pub minute: u64,
}

/// Admission gate for outbound sends.
///
/// Bucket keys are wall-clock truncations (`send:sec:{unix_sec}`,
/// `send:min:{unix_min}`), so the limiter holds no state of its own and the
/// store's TTLs do the cleanup. A burst can straddle a bucket edge; accepted.
///
/// Counter-store failures fail closed: zero budget, reservations refused,
/// error logged. The dispatcher never sees a store error from here.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Configured sustained throughput, for the reporting surface.
    pub fn sustained_rate_per_minute(&self) -> u64 {
        self.config.per_minute
    }

    fn unix_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn second_key(unix_sec: u64) -> String {
        format!("send:sec:{unix_sec}")
    }

    fn minute_key(unix_sec: u64) -> String {
        format!("send:min:{}", unix_sec / 60)
    }

    fn reservation_windows(&self, unix_sec: u64) -> [WindowReservation; 2] {
        [
            WindowReservation {
                key: Self::second_key(unix_sec),
                limit: self.config.per_second,
                ttl: SECOND_WINDOW_TTL,
            },
            WindowReservation {
                key: Self::minute_key(unix_sec),
                limit: self.config.per_minute,
                ttl: MINUTE_WINDOW_TTL,
            },
        ]
    }

    /// Snapshot of the current second/minute buckets.
    pub async fn window_counts(&self) -> CounterResult<WindowCounts> {
        let now = Self::unix_now();
        let second = self.store.get(&Self::second_key(now)).await?;
        let minute = self.store.get(&Self::minute_key(now)).await?;
        Ok(WindowCounts { second, minute })
    }

    /// Remaining admissions across both windows. Zero on store failure.
    pub async fn available_budget(&self) -> u64 {
        match self.window_counts().await {
            Ok(counts) => {
                let second_headroom = self.config.per_second.saturating_sub(counts.second);
                let minute_headroom = self.config.per_minute.saturating_sub(counts.minute);
                second_headroom.min(minute_headroom)
            }
            Err(e) => {
                warn!(error = %e, "Counter store unavailable, treating budget as zero");
                0
            }
        }
    }

    /// Atomically reserve one send slot in both windows. Refused on store
    /// failure.
    pub async fn try_reserve(&self) -> bool {
        let windows = self.reservation_windows(Self::unix_now());
        match self.store.reserve(&windows).await {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(error = %e, "Counter store unavailable, refusing reservation");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CounterError, InMemoryCounterStore};
    use async_trait::async_trait;

    struct FailingCounterStore;

    #[async_trait]
    impl CounterStore for FailingCounterStore {
        async fn reserve(&self, _windows: &[WindowReservation]) -> CounterResult<bool> {
            Err(CounterError::Unavailable("connection refused".to_string()))
        }

        async fn get(&self, _key: &str) -> CounterResult<u64> {
            Err(CounterError::Unavailable("connection refused".to_string()))
        }
    }

    fn limiter(per_second: u64, per_minute: u64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            RateLimiterConfig {
                per_second,
                per_minute,
            },
        )
    }

    #[tokio::test]
    async fn test_budget_starts_at_the_tighter_ceiling() {
        let limiter = limiter(5, 100);
        assert_eq!(limiter.available_budget().await, 5);
        assert_eq!(
            limiter.window_counts().await.unwrap(),
            WindowCounts::default()
        );
    }

    #[tokio::test]
    async fn test_reservations_drain_the_budget() {
        let limiter = limiter(100, 3);

        let mut admitted = 0;
        for _ in 0..5 {
            if limiter.try_reserve().await {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(limiter.available_budget().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_exceed_ceiling() {
        let store = Arc::new(InMemoryCounterStore::new());
        let windows = Arc::new([
            WindowReservation {
                key: "send:sec:fixed".to_string(),
                limit: 5,
                ttl: Duration::from_secs(60),
            },
            WindowReservation {
                key: "send:min:fixed".to_string(),
                limit: 100,
                ttl: Duration::from_secs(60),
            },
        ]);

        let mut handles = vec![];
        for _ in 0..25 {
            let store = store.clone();
            let windows = windows.clone();
            handles.push(tokio::spawn(
                async move { store.reserve(&windows[..]).await },
            ));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
        assert_eq!(store.get("send:sec:fixed").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_fails_closed_when_store_is_down() {
        let limiter = RateLimiter::new(Arc::new(FailingCounterStore), RateLimiterConfig::default());

        assert_eq!(limiter.available_budget().await, 0);
        assert!(!limiter.try_reserve().await);
        assert!(limiter.window_counts().await.is_err());
    }

    #[tokio::test]
    async fn test_sustained_rate_reports_minute_ceiling() {
        let limiter = limiter(5, 100);
        assert_eq!(limiter.sustained_rate_per_minute(), 100);
    }
}
