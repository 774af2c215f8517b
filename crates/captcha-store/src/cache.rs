//! TTL-bounded cache of recognition results.
//!
//! Keys combine the site, the locator and a fingerprint of the captured
//! image, since the challenge behind a stable selector changes between
//! loads. Expired entries read as absent and are evicted when touched, and
//! in bulk by [`ResolutionCache::sweep`].

use crate::error::{Result, StoreError};
use crate::store::PersistenceStore;
use captcha_core::{LocatorId, SiteKey, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Key prefix for cache entries.
pub const CACHE_PREFIX: &str = "cache:";

/// SHA-256 of image bytes, hex encoded.
#[must_use]
pub fn fingerprint(image: &[u8]) -> String {
    hex::encode(Sha256::digest(image))
}

/// Cache key for a site, locator and image.
#[must_use]
pub fn cache_key(site_key: &SiteKey, locator_id: &LocatorId, image: &[u8]) -> String {
    format!("{CACHE_PREFIX}{site_key}:{locator_id}:{}", fingerprint(image))
}

/// A cached recognition result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Recognised text
    pub result: String,
    /// Instant after which the entry reads as absent
    pub expires_at: Timestamp,
}

impl CacheEntry {
    /// Whether the entry has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// Recognition results with per-entry expiry.
#[derive(Clone)]
pub struct ResolutionCache {
    store: Arc<dyn PersistenceStore>,
    ttl: Duration,
    timeout: Duration,
}

impl ResolutionCache {
    /// Create a cache with a default TTL and a per-call store timeout.
    #[must_use]
    pub fn new(store: Arc<dyn PersistenceStore>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            store,
            ttl,
            timeout,
        }
    }

    /// Default TTL for [`Self::put`] callers that don't choose one.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached result, if present and not expired.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_at(key, Timestamp::now()).await
    }

    /// [`Self::get`] evaluated at a given instant.
    pub async fn get_at(&self, key: &str, now: Timestamp) -> Result<Option<String>> {
        let Some(raw) = self.call(self.store.get(key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if !entry.is_expired(now) => Ok(Some(entry.result)),
            Ok(_) => {
                debug!(key, "evicting expired cache entry");
                self.call(self.store.remove(key)).await?;
                Ok(None)
            }
            Err(e) => {
                warn!(key, error = %e, "evicting unreadable cache entry");
                self.call(self.store.remove(key)).await?;
                Ok(None)
            }
        }
    }

    /// Store a result for `ttl`.
    pub async fn put(&self, key: &str, result: &str, ttl: Duration) -> Result<()> {
        self.put_at(key, result, ttl, Timestamp::now()).await
    }

    /// [`Self::put`] with the entry's clock starting at `now`.
    pub async fn put_at(&self, key: &str, result: &str, ttl: Duration, now: Timestamp) -> Result<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            result: result.to_string(),
            expires_at: now.after(ttl),
        };
        let raw = serde_json::to_string(&entry)?;
        self.call(self.store.put(key, raw)).await
    }

    /// Remove every expired or unreadable entry. Returns the number removed.
    pub async fn sweep(&self) -> Result<usize> {
        self.sweep_at(Timestamp::now()).await
    }

    /// [`Self::sweep`] evaluated at a given instant.
    pub async fn sweep_at(&self, now: Timestamp) -> Result<usize> {
        let keys = self.call(self.store.keys(CACHE_PREFIX)).await?;
        let mut removed = 0;
        for key in keys {
            let Some(raw) = self.call(self.store.get(&key)).await? else {
                continue;
            };
            let stale = serde_json::from_str::<CacheEntry>(&raw)
                .map_or(true, |entry| entry.is_expired(now));
            if stale {
                self.call(self.store.remove(&key)).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }

    /// Sweep every `interval` on a background task until `cancel` fires.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = cache.sweep().await {
                            warn!(error = %e, "cache sweep failed");
                        }
                    }
                }
            }
        })
    }

    async fn call<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cache() -> (Arc<MemoryStore>, ResolutionCache) {
        let backend = Arc::new(MemoryStore::new());
        let cache = ResolutionCache::new(
            backend.clone(),
            Duration::from_secs(300),
            Duration::from_secs(1),
        );
        (backend, cache)
    }

    #[test]
    fn test_cache_key_includes_fingerprint() {
        let site = SiteKey::new("example.com").expect("site");
        let id = LocatorId::generate();
        let a = cache_key(&site, &id, b"image-a");
        let b = cache_key(&site, &id, b"image-b");

        assert_ne!(a, b);
        assert!(a.starts_with(&format!("cache:example.com:{id}:")));
        assert_eq!(fingerprint(b"image-a").len(), 64);
    }

    #[tokio::test]
    async fn test_put_then_get_until_expiry() {
        let (backend, cache) = cache();
        let now = Timestamp::now();
        let ttl = Duration::from_secs(60);

        cache.put_at("cache:k", "ab12", ttl, now).await.expect("put");
        assert_eq!(
            cache.get_at("cache:k", now).await.expect("get"),
            Some("ab12".to_string())
        );

        let later = now.after(ttl);
        assert_eq!(cache.get_at("cache:k", later).await.expect("get"), None);
        // Lazily evicted on lookup
        assert!(backend.get("cache:k").await.expect("raw get").is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_only() {
        let (backend, cache) = cache();
        let now = Timestamp::now();

        cache
            .put_at("cache:old", "a", Duration::from_secs(1), now)
            .await
            .expect("put old");
        cache
            .put_at("cache:new", "b", Duration::from_secs(600), now)
            .await
            .expect("put new");
        backend
            .put("cache:broken", "{".to_string())
            .await
            .expect("put broken");
        backend
            .put("locator:example.com", "{}".to_string())
            .await
            .expect("put locator");

        let removed = cache
            .sweep_at(now.after(Duration::from_secs(10)))
            .await
            .expect("sweep");
        assert_eq!(removed, 2);
        assert_eq!(backend.len().await, 2);
        assert!(backend.get("locator:example.com").await.expect("get").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_cancel() {
        let (_, cache) = cache();
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(60), cancel.clone());

        tokio::time::advance(Duration::from_secs(120)).await;
        cancel.cancel();
        handle.await.expect("sweeper task joins");
    }
}
