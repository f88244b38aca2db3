//! In-memory counter store.
//!
//! Process-local fallback used in tests and single-instance deployments
//! (configured by leaving the Redis URL empty). Expiry is lazy: a bucket is
//! dropped when it is next touched after its deadline.

use crate::{CounterResult, CounterStore, WindowReservation};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Default)]
pub struct InMemoryCounterStore {
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    count: u64,
    expires_at: Instant,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn reserve(&self, windows: &[WindowReservation]) -> CounterResult<bool> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        buckets.retain(|_, bucket| bucket.expires_at > now);

        // Check every window before touching any
        for window in windows {
            if let Some(bucket) = buckets.get(&window.key) {
                if bucket.count >= window.limit {
                    return Ok(false);
                }
            }
        }

        for window in windows {
            buckets
                .entry(window.key.clone())
                .and_modify(|bucket| bucket.count += 1)
                .or_insert(Bucket {
                    count: 1,
                    expires_at: now + window.ttl,
                });
        }

        Ok(true)
    }

    async fn get(&self, key: &str) -> CounterResult<u64> {
        let now = Instant::now();
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(buckets
            .get(key)
            .filter(|bucket| bucket.expires_at > now)
            .map(|bucket| bucket.count)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn window(key: &str, limit: u64) -> WindowReservation {
        WindowReservation {
            key: key.to_string(),
            limit,
            ttl: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_reserve_up_to_limit() {
        let store = InMemoryCounterStore::new();
        let windows = [window("w1", 3)];

        for _ in 0..3 {
            assert!(store.reserve(&windows).await.unwrap());
        }
        assert!(!store.reserve(&windows).await.unwrap());
        assert_eq!(store.get("w1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_refusal_touches_no_window() {
        let store = InMemoryCounterStore::new();
        let narrow = window("narrow", 1);
        let wide = window("wide", 100);

        assert!(store
            .reserve(&[narrow.clone(), wide.clone()])
            .await
            .unwrap());
        // Second attempt fails on the narrow window; the wide one must not move
        assert!(!store.reserve(&[narrow, wide]).await.unwrap());
        assert_eq!(store.get("wide").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_bucket_reads_zero() {
        let store = InMemoryCounterStore::new();
        let short = WindowReservation {
            key: "short".to_string(),
            limit: 1,
            ttl: Duration::from_millis(20),
        };

        assert!(store.reserve(&[short.clone()]).await.unwrap());
        assert!(!store.reserve(&[short.clone()]).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("short").await.unwrap(), 0);
        assert!(store.reserve(&[short]).await.unwrap());
    }
}
