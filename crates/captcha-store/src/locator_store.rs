//! Locator persistence keyed by site.

use crate::error::{Result, StoreError};
use crate::locator::Locator;
use crate::store::PersistenceStore;
use captcha_core::SiteKey;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key prefix for locator records.
pub const LOCATOR_PREFIX: &str = "locator:";

/// Reads and writes [`Locator`] records, one per site key.
///
/// Every store call is bounded by the configured timeout.
#[derive(Clone)]
pub struct LocatorStore {
    store: Arc<dyn PersistenceStore>,
    timeout: Duration,
}

impl LocatorStore {
    /// Create a locator store over a persistence backend.
    #[must_use]
    pub fn new(store: Arc<dyn PersistenceStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Storage key for a site.
    #[must_use]
    pub fn key(site_key: &SiteKey) -> String {
        format!("{LOCATOR_PREFIX}{site_key}")
    }

    /// Locator for a site, if one was saved.
    pub async fn get(&self, site_key: &SiteKey) -> Result<Option<Locator>> {
        let key = Self::key(site_key);
        match self.call(self.store.get(&key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the locator for its site.
    pub async fn save(&self, locator: &Locator) -> Result<()> {
        let key = Self::key(&locator.site_key);
        let raw = serde_json::to_string(locator)?;
        self.call(self.store.put(&key, raw)).await?;
        debug!(
            site = %locator.site_key,
            locator_id = %locator.id,
            tries = locator.try_count,
            "saved locator"
        );
        Ok(())
    }

    /// Delete a site's locator. Returns `true` if one existed.
    pub async fn remove(&self, site_key: &SiteKey) -> Result<bool> {
        let key = Self::key(site_key);
        let existed = self.call(self.store.get(&key)).await?.is_some();
        if existed {
            self.call(self.store.remove(&key)).await?;
            info!(site = %site_key, "removed locator");
        }
        Ok(existed)
    }

    /// All saved locators. Unreadable records are skipped.
    pub async fn list(&self) -> Result<Vec<Locator>> {
        let keys = self.call(self.store.keys(LOCATOR_PREFIX)).await?;
        let mut locators = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.call(self.store.get(&key)).await? else {
                continue;
            };
            match serde_json::from_str::<Locator>(&raw) {
                Ok(locator) => locators.push(locator),
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable locator record"),
            }
        }
        Ok(locators)
    }

    /// The `limit` most-used locators, by attempt count.
    pub async fn popular(&self, limit: usize) -> Result<Vec<Locator>> {
        let mut locators = self.list().await?;
        locators.sort_by(|a, b| {
            b.try_count
                .cmp(&a.try_count)
                .then_with(|| a.site_key.cmp(&b.site_key))
        });
        locators.truncate(limit);
        Ok(locators)
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
    use crate::locator::LocatorOrigin;
    use crate::store::MemoryStore;
    use captcha_core::ChallengeType;

    fn store() -> (Arc<MemoryStore>, LocatorStore) {
        let backend = Arc::new(MemoryStore::new());
        let locators = LocatorStore::new(backend.clone(), Duration::from_secs(1));
        (backend, locators)
    }

    fn locator(site: &str, tries: u32) -> Locator {
        let mut locator = Locator::new(
            SiteKey::new(site).expect("valid site key"),
            ChallengeType::Character,
            "#captcha",
            LocatorOrigin::Auto,
        );
        for _ in 0..tries {
            locator.record_success("x");
        }
        locator
    }

    #[tokio::test]
    async fn test_save_get_remove() {
        let (_, store) = store();
        let locator = locator("example.com", 0);

        store.save(&locator).await.expect("save");
        let loaded = store
            .get(&locator.site_key)
            .await
            .expect("get")
            .expect("locator present");
        assert_eq!(loaded, locator);

        assert!(store.remove(&locator.site_key).await.expect("remove"));
        assert!(!store.remove(&locator.site_key).await.expect("remove again"));
        assert!(store.get(&locator.site_key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_popular_and_list_skip_corrupt() {
        let (backend, store) = store();
        store.save(&locator("a.com", 1)).await.expect("save a");
        store.save(&locator("b.com", 5)).await.expect("save b");
        store.save(&locator("c.com", 3)).await.expect("save c");
        backend
            .put("locator:broken.com", "{not json".to_string())
            .await
            .expect("put corrupt");
        backend
            .put("cache:x", "ignored".to_string())
            .await
            .expect("put cache entry");

        assert_eq!(store.list().await.expect("list").len(), 3);

        let popular = store.popular(2).await.expect("popular");
        let sites: Vec<_> = popular.iter().map(|l| l.site_key.as_str().to_string()).collect();
        assert_eq!(sites, vec!["b.com", "c.com"]);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let (backend, store) = store();
        backend
            .put("locator:example.com", "{not json".to_string())
            .await
            .expect("put corrupt");
        let site = SiteKey::new("example.com").expect("valid site key");
        assert!(matches!(
            store.get(&site).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
