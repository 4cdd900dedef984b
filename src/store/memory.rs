//! In-process store backed by `DashMap`.
//!
//! Correct for a single gateway instance: entry-level locking serializes
//! concurrent operations on the same key, and expiry is enforced lazily on
//! access plus a periodic sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::SharedStore;
use crate::Result;

#[derive(Debug)]
struct Counter {
    value: u64,
    expires_at: Instant,
}

#[derive(Debug)]
struct Claim {
    expires_at: Instant,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    expires_at: Instant,
}

/// In-memory [`SharedStore`] implementation.
///
/// Atomicity comes from `DashMap`'s per-entry locking: each operation holds
/// the entry guard for the whole read-modify-write, so same-key callers
/// never interleave.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, Counter>,
    claims: DashMap<String, Claim>,
    buckets: DashMap<String, Bucket>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict expired counters, claims, and idle buckets.
    ///
    /// Called by the background maintenance task; lazy expiry on access keeps
    /// results correct between sweeps.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let before =
            self.counters.len() + self.claims.len() + self.buckets.len();
        self.counters.retain(|_, c| c.expires_at > now);
        self.claims.retain(|_, c| c.expires_at > now);
        self.buckets.retain(|_, b| b.expires_at > now);
        let evicted =
            before - (self.counters.len() + self.claims.len() + self.buckets.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired store entries");
        }
    }

    /// Total number of live entries across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len() + self.claims.len() + self.buckets.len()
    }

    /// Return `true` when the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Counter {
                value: 0,
                expires_at: now + ttl,
            });
        if entry.expires_at <= now {
            // Expired in place: restart the window.
            entry.value = 0;
            entry.expires_at = now + ttl;
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn read_counter(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|c| c.expires_at > now)
            .map_or(0, |c| c.value))
    }

    async fn read_counters(&self, keys: &[String]) -> Result<Vec<u64>> {
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| {
                self.counters
                    .get(key)
                    .filter(|c| c.expires_at > now)
                    .map_or(0, |c| c.value)
            })
            .collect())
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut claimed = false;
        let mut entry = self.claims.entry(key.to_string()).or_insert_with(|| {
            claimed = true;
            Claim {
                expires_at: now + ttl,
            }
        });
        if !claimed && entry.expires_at <= now {
            // Previous claim expired in place: take it over.
            entry.expires_at = now + ttl;
            claimed = true;
        }
        Ok(claimed)
    }

    async fn take_token(
        &self,
        key: &str,
        capacity: u32,
        refill_per_sec: f64,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                tokens: f64::from(capacity),
                last_refill: now,
                expires_at: now + ttl,
            });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * refill_per_sec).min(f64::from(capacity));
        bucket.last_refill = now;
        bucket.expires_at = now + ttl;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Spawn a background task that periodically evicts expired entries.
///
/// The task runs every `interval` and stops when the `Arc` reference count
/// drops to 1 (all other owners have dropped their handles).
pub fn spawn_sweep_task(store: Arc<MemoryStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if Arc::strong_count(&store) <= 1 {
                break;
            }
            store.evict_expired();
        }
    });
}
