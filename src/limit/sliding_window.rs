//! Sliding-window counting via a sub-window histogram.
//!
//! The window is divided into fixed slices; each check increments the
//! current slice and sums the slices covering the trailing window. Admission
//! therefore decays smoothly instead of hard-resetting at boundaries, at the
//! cost of one increment plus one batched read per check. Slice alignment
//! makes the trailing window approximate to within one slice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{Decision, RateKey, RateLimitAlgorithm};
use crate::store::SharedStore;
use crate::Result;

/// Number of histogram slices per window.
const SLICES: u64 = 8;

/// Sliding-window limiter over the shared store.
pub struct SlidingWindowLimiter {
    store: Arc<dyn SharedStore>,
}

impl SlidingWindowLimiter {
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
impl RateLimitAlgorithm for SlidingWindowLimiter {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    async fn check(&self, key: &RateKey, limit: u32, window: Duration) -> Result<Decision> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(SLICES);
        let slice_ms = (window_ms / SLICES).max(1);
        let now = now_ms();
        let current_slice = now / slice_ms;

        // Slices must outlive the window they contribute to.
        let slice_ttl = window.saturating_mul(2);
        let current_key = format!("rl:sw:{key}:{current_slice}");
        let current_count = self.store.incr_with_ttl(&current_key, slice_ttl).await?;

        let older: Vec<String> = (1..SLICES)
            .map(|back| format!("rl:sw:{key}:{}", current_slice.saturating_sub(back)))
            .collect();
        let older_counts = self.store.read_counters(&older).await?;
        let total: u64 = current_count + older_counts.iter().sum::<u64>();

        if total <= u64::from(limit) {
            Ok(Decision::Allowed)
        } else {
            // The oldest contributing slice rolls out at the next boundary.
            let until_boundary_ms = slice_ms - (now % slice_ms);
            Ok(Decision::Limited {
                retry_after_secs: until_boundary_ms.div_ceil(1000).max(1),
            })
        }
    }
}
