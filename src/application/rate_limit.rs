//! Per-visitor fixed-window admission control.
//!
//! The first request in a window creates the counter with an atomic add; later
//! requests increment it. Any cache failure lets the request through.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::cache::{KeyValueCache, rate_limit_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Rejected { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<KeyValueCache>,
    limit: u32,
    interval: Duration,
}

impl RateLimiter {
    /// A `limit` of zero disables the check.
    pub fn new(cache: Arc<KeyValueCache>, limit: u32, interval: Duration) -> Self {
        Self {
            cache,
            limit,
            interval,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn check(&self, fingerprint: &str) -> RateDecision {
        if self.limit == 0 {
            return RateDecision::Allowed;
        }
        let key = rate_limit_key(fingerprint);

        match self
            .cache
            .add(&key, Bytes::from_static(b"1"), self.interval)
            .await
        {
            Ok(true) => return RateDecision::Allowed,
            Ok(false) => {}
            Err(err) => {
                warn!(key = %key, error = %err, "rate limit window unavailable; allowing request");
                return RateDecision::Allowed;
            }
        }

        let count = match self.cache.increment(&key).await {
            Ok(Some(count)) => count,
            Ok(None) => {
                debug!(key = %key, "rate limit window expired mid-check; allowing request");
                return RateDecision::Allowed;
            }
            Err(err) => {
                warn!(key = %key, error = %err, "rate limit increment failed; allowing request");
                return RateDecision::Allowed;
            }
        };

        if count > i64::from(self.limit) {
            RateDecision::Rejected {
                retry_after_secs: self.interval.as_secs(),
            }
        } else {
            RateDecision::Allowed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::cache::MemoryStore;

    fn limiter(limit: u32, interval: Duration) -> RateLimiter {
        let cache = Arc::new(KeyValueCache::Memory(MemoryStore::new(
            NonZeroUsize::new(64).expect("capacity"),
        )));
        RateLimiter::new(cache, limit, interval)
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_past_the_limit_until_the_window_expires() {
        let limiter = limiter(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert_eq!(limiter.check("10.0.0.1:ua").await, RateDecision::Allowed);
        }
        assert_eq!(
            limiter.check("10.0.0.1:ua").await,
            RateDecision::Rejected {
                retry_after_secs: 60
            }
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.check("10.0.0.1:ua").await, RateDecision::Allowed);
    }

    #[tokio::test]
    async fn visitors_have_separate_windows() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert_eq!(limiter.check("a").await, RateDecision::Allowed);
        assert!(matches!(limiter.check("a").await, RateDecision::Rejected { .. }));
        assert_eq!(limiter.check("b").await, RateDecision::Allowed);
    }

    #[tokio::test]
    async fn zero_limit_disables_the_check() {
        let limiter = limiter(0, Duration::from_secs(60));
        for _ in 0..10 {
            assert_eq!(limiter.check("a").await, RateDecision::Allowed);
        }
    }

    #[tokio::test]
    async fn disabled_cache_always_allows() {
        let limiter = RateLimiter::new(Arc::new(KeyValueCache::Disabled), 1, Duration::from_secs(60));
        for _ in 0..5 {
            assert_eq!(limiter.check("a").await, RateDecision::Allowed);
        }
    }
}
