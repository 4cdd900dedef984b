//! Shared atomic store for cross-instance coordination.
//!
//! Rate-limit counters and signature nonces must stay correct when several
//! gateway processes share one store namespace, so every primitive here
//! (windowed increment, set-if-absent claim, token-bucket step) executes as
//! a single logical operation inside the backing store. Callers never
//! read-modify-write.
//!
//! Two implementations:
//! - [`MemoryStore`]: in-process, for single-instance deployments and tests
//! - [`RedisStore`]: Redis-backed, for fleets sharing one namespace

mod memory;
mod redis;

pub use self::memory::{MemoryStore, spawn_sweep_task};
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Atomic primitives shared across gateway instances.
///
/// Implementations must make each method a single atomic step with respect
/// to concurrent callers on the same key, including callers in other
/// processes for networked backends.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Increment the counter at `key` and return the post-increment value.
    ///
    /// `ttl` is applied only when this call creates the key, so a window
    /// counter expires relative to its first hit.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Read a counter without mutating it. Missing or expired keys read as 0.
    async fn read_counter(&self, key: &str) -> Result<u64>;

    /// Read several counters in one round trip, in input order.
    async fn read_counters(&self, keys: &[String]) -> Result<Vec<u64>>;

    /// Claim `key` if nobody holds it, with `ttl`.
    ///
    /// Returns `true` when this call performed the claim and `false` when a
    /// live claim already existed. At most one concurrent caller per key
    /// observes `true`.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Token-bucket step: refill the bucket at `refill_per_sec` up to
    /// `capacity`, then try to take one token.
    ///
    /// Returns `true` when a token was taken. `ttl` bounds how long an idle
    /// bucket survives.
    async fn take_token(
        &self,
        key: &str,
        capacity: u32,
        refill_per_sec: f64,
        ttl: Duration,
    ) -> Result<bool>;
}
