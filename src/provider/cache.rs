//! TTL cache in front of the credential provider.
//!
//! Signature verification hits the credential lookup on every request; this
//! cache keeps the provider off that hot path. Entries live for a fixed TTL
//! and are also evicted eagerly by app-status-change notifications. Unknown
//! app keys are cached too, so a flood of bogus keys cannot stampede the
//! provider.
//!
//! The cache only bounds staleness of the *lookup*; hard credential expiry
//! (`expires_at`) is checked by the caller on every use.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{AppCredential, CredentialProvider};
use crate::Result;

struct CacheEntry {
    credential: Option<AppCredential>,
    fetched_at: Instant,
}

/// TTL cache over [`CredentialProvider::credential`].
pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CredentialCache {
    /// Wrap `provider` with a cache holding entries for `ttl`.
    #[must_use]
    pub fn new(provider: Arc<dyn CredentialProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Credential for `app_key`, served from cache when fresh.
    ///
    /// `None` means the management plane does not know the key; that answer
    /// is cached like any other.
    ///
    /// # Errors
    ///
    /// Propagates provider failures. A stale entry is never served in place
    /// of a failed refresh.
    pub async fn get(&self, app_key: &str) -> Result<Option<AppCredential>> {
        if let Some(entry) = self.entries.get(app_key) {
            if entry.fetched_at.elapsed() <= self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.credential.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let credential = self.provider.credential(app_key).await?;
        self.entries.insert(
            app_key.to_string(),
            CacheEntry {
                credential: credential.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(credential)
    }

    /// Drop the cached entry for `app_key`; the next use refetches.
    pub fn invalidate(&self, app_key: &str) {
        if self.entries.remove(app_key).is_some() {
            debug!(app_key, "Invalidated cached credential");
        }
    }

    /// Evict entries past their TTL. Called by the maintenance task.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.fetched_at.elapsed() <= ttl);
    }

    /// Number of cached entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hit/miss counters since start.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

/// Spawn the periodic cache-eviction task.
///
/// Reads enforce the TTL themselves; this task only keeps stale entries,
/// negative ones included, from accumulating. Runs every `interval` until
/// the shutdown signal fires.
pub fn spawn_evict_task(
    cache: Arc<CredentialCache>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => cache.evict_expired(),
                _ = shutdown_rx.recv() => {
                    info!("Credential eviction task stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AppStatus, CredentialProvider, MemoryCredentialProvider};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn credential(app_key: &str) -> AppCredential {
        AppCredential {
            app_key: app_key.into(),
            app_secret: "s".into(),
            tenant_id: "t1".into(),
            status: AppStatus::Active,
            expires_at: None,
        }
    }

    /// Wraps the memory provider and counts lookups.
    struct CountingProvider {
        inner: MemoryCredentialProvider,
        calls: AtomicU64,
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        async fn credential(&self, app_key: &str) -> Result<Option<AppCredential>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.credential(app_key).await
        }

        async fn is_subscribed_to_api(&self, app_key: &str, api_id: &str) -> Result<bool> {
            self.inner.is_subscribed_to_api(app_key, api_id).await
        }

        async fn is_subscribed_to_path(&self, app_key: &str, path: &str) -> Result<bool> {
            self.inner.is_subscribed_to_path(app_key, path).await
        }
    }

    fn counting_provider() -> Arc<CountingProvider> {
        let inner = MemoryCredentialProvider::new();
        inner.upsert(credential("AK123"));
        Arc::new(CountingProvider {
            inner,
            calls: AtomicU64::new(0),
        })
    }

    #[tokio::test]
    async fn fresh_entries_are_served_without_provider_calls() {
        let provider = counting_provider();
        let cache = CredentialCache::new(provider.clone(), Duration::from_secs(60));

        for _ in 0..5 {
            let got = cache.get("AK123").await.unwrap();
            assert!(got.is_some());
        }

        assert_eq!(provider.calls.load(Ordering::Relaxed), 1);
        let (hits, misses) = cache.stats();
        assert_eq!((hits, misses), (4, 1));
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let provider = counting_provider();
        let cache = CredentialCache::new(provider.clone(), Duration::from_millis(10));

        cache.get("AK123").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.get("AK123").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn unknown_keys_are_negatively_cached() {
        let provider = counting_provider();
        let cache = CredentialCache::new(provider.clone(), Duration::from_secs(60));

        assert!(cache.get("BOGUS").await.unwrap().is_none());
        assert!(cache.get("BOGUS").await.unwrap().is_none());

        assert_eq!(provider.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let provider = counting_provider();
        let cache = CredentialCache::new(provider.clone(), Duration::from_secs(60));

        cache.get("AK123").await.unwrap();
        cache.invalidate("AK123");
        cache.get("AK123").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn evict_expired_drops_only_stale_entries() {
        let provider = counting_provider();
        let cache = CredentialCache::new(provider, Duration::from_millis(10));

        cache.get("AK123").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.evict_expired();

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn evict_task_cleans_up_in_background() {
        let provider = counting_provider();
        let cache = Arc::new(CredentialCache::new(provider, Duration::from_millis(5)));
        cache.get("AK123").await.unwrap();

        let (shutdown_tx, _) = broadcast::channel(1);
        let task = spawn_evict_task(
            Arc::clone(&cache),
            Duration::from_millis(10),
            shutdown_tx.subscribe(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.is_empty(), "stale entry should have been evicted");

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
