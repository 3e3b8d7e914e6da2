//! Per-key request quotas.
//!
//! Handlers that need a quota decision in the middle of their own pipeline
//! (rather than as a router layer) take an `Arc<dyn QuotaStore>`. The default
//! store is an in-memory GCRA limiter, which is enough for a single instance;
//! a shared counter store can implement the same trait for multi-instance
//! deployments.

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

/// Returned when a key has used up its quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExceeded {
    /// Seconds until the next request for this key would be admitted.
    pub retry_after_secs: u64,
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Counts one request against `key` and reports whether it is admitted.
    async fn check_and_increment(&self, key: &str) -> Result<(), QuotaExceeded>;

    /// Forget keys whose quota has fully replenished. Returns the number of
    /// keys still tracked.
    fn prune(&self) -> usize;
}

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// In-memory quota store backed by a keyed `governor` limiter.
///
/// `limit` requests are admitted per key immediately; capacity is then
/// replenished evenly across `window`.
pub struct InMemoryQuotaStore {
    limiter: KeyedLimiter,
    limit: u32,
}

impl InMemoryQuotaStore {
    pub fn new(limit: u32, window: Duration) -> Self {
        let limit = limit.max(1);
        let period = (window / limit).max(Duration::from_millis(1));
        let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            limiter: RateLimiter::dashmap(quota),
            limit,
        }
    }

    pub fn shared(limit: u32, window: Duration) -> Arc<dyn QuotaStore> {
        Arc::new(Self::new(limit, window))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn check_and_increment(&self, key: &str) -> Result<(), QuotaExceeded> {
        self.limiter.check_key(&key.to_string()).map_err(|negative| {
            let wait = negative.wait_time_from(DefaultClock::default().now());
            QuotaExceeded {
                retry_after_secs: wait.as_secs().max(1),
            }
        })
    }

    fn prune(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        self.limiter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects() {
        let store = InMemoryQuotaStore::new(3, Duration::from_secs(24 * 60 * 60));

        for _ in 0..3 {
            assert!(store.check_and_increment("10.0.0.1").await.is_ok());
        }

        let rejected = store.check_and_increment("10.0.0.1").await.unwrap_err();
        assert!(rejected.retry_after_secs > 0);
    }

    #[tokio::test]
    async fn keys_are_counted_independently() {
        let store = InMemoryQuotaStore::new(1, Duration::from_secs(60));

        assert!(store.check_and_increment("10.0.0.1").await.is_ok());
        assert!(store.check_and_increment("10.0.0.1").await.is_err());
        assert!(store.check_and_increment("10.0.0.2").await.is_ok());
    }

    #[tokio::test]
    async fn prune_forgets_keys_once_their_window_has_passed() {
        let store = InMemoryQuotaStore::new(1, Duration::from_millis(10));

        assert!(store.check_and_increment("10.0.0.1").await.is_ok());
        assert!(store.check_and_increment("10.0.0.2").await.is_ok());
        assert_eq!(store.tracked_keys(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.prune(), 0);
        assert_eq!(store.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn prune_keeps_keys_inside_their_window() {
        let store = InMemoryQuotaStore::new(3, Duration::from_secs(24 * 60 * 60));

        for _ in 0..3 {
            store.check_and_increment("10.0.0.1").await.unwrap();
        }
        assert_eq!(store.prune(), 1);

        // Pruning must not reset the count
        assert!(store.check_and_increment("10.0.0.1").await.is_err());
    }

    #[test]
    fn zero_limit_is_clamped_to_one() {
        let store = InMemoryQuotaStore::new(0, Duration::from_secs(60));
        assert_eq!(store.limit(), 1);
    }
}
