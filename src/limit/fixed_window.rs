//! Fixed-window counting.
//!
//! One counter per (key, window start). The counter expires with the window,
//! so rollover is a hard reset: a caller can burst up to twice the limit
//! across a boundary. Documented behavior, the price of one store op per
//! check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{Decision, RateKey, RateLimitAlgorithm};
use crate::store::SharedStore;
use crate::Result;

/// Fixed-window limiter over the shared store.
pub struct FixedWindowLimiter {
    store: Arc<dyn SharedStore>,
}

impl FixedWindowLimiter {
    /// Create a limiter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

#[async_trait]
impl RateLimitAlgorithm for FixedWindowLimiter {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    async fn check(&self, key: &RateKey, limit: u32, window: Duration) -> Result<Decision> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let now = now_ms();
        let window_start = now - (now % window_ms);

        let store_key = format!("rl:fw:{key}:{window_start}");
        let count = self.store.incr_with_ttl(&store_key, window).await?;

        if count <= u64::from(limit) {
            Ok(Decision::Allowed)
        } else {
            let remaining_ms = window_start + window_ms - now;
            Ok(Decision::Limited {
                retry_after_secs: remaining_ms.div_ceil(1000).max(1),
            })
        }
    }
}
