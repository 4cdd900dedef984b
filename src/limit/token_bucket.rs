//! Token-bucket limiting.
//!
//! Capacity equals the limit, refill rate spreads the limit across the
//! window. Callers may burst up to a full bucket, then settle into the
//! steady rate. The refill-and-take step runs atomically inside the store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Decision, RateKey, RateLimitAlgorithm};
use crate::store::SharedStore;
use crate::Result;

/// Token-bucket limiter over the shared store.
pub struct TokenBucketLimiter {
    store: Arc<dyn SharedStore>,
}

impl TokenBucketLimiter {
    /// Create a limiter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RateLimitAlgorithm for TokenBucketLimiter {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    async fn check(&self, key: &RateKey, limit: u32, window: Duration) -> Result<Decision> {
        let refill_per_sec = f64::from(limit.max(1)) / window.as_secs_f64().max(f64::EPSILON);
        // Idle buckets refill to capacity within one window; keep the state
        // around twice that long before letting it expire.
        let ttl = window.saturating_mul(2);
        let store_key = format!("rl:tb:{key}");

        if self
            .store
            .take_token(&store_key, limit, refill_per_sec, ttl)
            .await?
        {
            Ok(Decision::Allowed)
        } else {
            // Next token accrues in 1/rate seconds.
            let wait_secs = (1.0 / refill_per_sec).ceil();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let retry_after_secs = (wait_secs as u64).max(1);
            Ok(Decision::Limited { retry_after_secs })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn key() -> RateKey {
        RateKey::build(
            super::super::KeyStrategy::IpPath,
            "10.0.0.1",
            "/open/ping",
            None,
        )
    }

    #[tokio::test]
    async fn allows_burst_up_to_capacity() {
        let limiter = TokenBucketLimiter::new(Arc::new(MemoryStore::new()));
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert_eq!(
                limiter.check(&key(), 3, window).await.unwrap(),
                Decision::Allowed
            );
        }
        match limiter.check(&key(), 3, window).await.unwrap() {
            Decision::Limited { retry_after_secs } => assert!(retry_after_secs >= 1),
            Decision::Allowed => panic!("bucket should be empty"),
        }
    }

    #[tokio::test]
    async fn refill_admits_after_a_wait() {
        // 5 tokens per second: an empty bucket earns one back in 200ms.
        let limiter = TokenBucketLimiter::new(Arc::new(MemoryStore::new()));
        let window = Duration::from_secs(2);

        for _ in 0..10 {
            let _ = limiter.check(&key(), 10, window).await.unwrap();
        }
        assert!(matches!(
            limiter.check(&key(), 10, window).await.unwrap(),
            Decision::Limited { .. }
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            limiter.check(&key(), 10, window).await.unwrap(),
            Decision::Allowed
        );
    }
}
