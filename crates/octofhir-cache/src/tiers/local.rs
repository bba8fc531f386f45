//! Local (in-process) tier.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::driver::DynDriver;
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::serializer::Serializer;

/// Local tier: a driver plus the store codec.
///
/// Entries that fail to decode are treated as absent and removed.
#[derive(Debug, Clone)]
pub struct LocalCache {
    driver: DynDriver,
    serializer: Arc<dyn Serializer>,
}

impl LocalCache {
    pub fn new(driver: DynDriver, serializer: Arc<dyn Serializer>) -> Self {
        Self { driver, serializer }
    }

    pub fn driver(&self) -> &DynDriver {
        &self.driver
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let Some(bytes) = self.driver.get(key).await? else {
            return Ok(None);
        };

        match self.serializer.deserialize(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = %key, error = %e, "dropping undecodable local entry");
                self.driver.delete(key).await?;
                Ok(None)
            }
        }
    }

    /// Store an already-serialized entry.
    pub async fn set(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        self.driver.set(key, bytes, ttl).await
    }

    pub async fn write_entry(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let bytes = self.serializer.serialize(entry)?;
        self.driver.set(key, bytes, ttl).await
    }

    pub async fn has(&self, key: &str) -> CacheResult<bool> {
        self.driver.has(key).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.driver.delete(key).await
    }

    pub async fn delete_many(&self, keys: &[String]) -> CacheResult<bool> {
        self.driver.delete_many(keys).await
    }

    /// Remove every key under the qualified `namespace`.
    pub async fn clear_namespace(&self, namespace: &str) -> CacheResult<()> {
        self.driver.namespace(namespace).clear().await
    }

    /// Mark the entry stale while keeping its eviction time, so it can still
    /// be served as a graced value.
    ///
    /// The write only lands if the entry is unchanged since it was read; a
    /// concurrent write wins and is left as is.
    pub async fn logically_expire(&self, key: &str) -> CacheResult<bool> {
        let Some(bytes) = self.driver.get(key).await? else {
            return Ok(false);
        };
        let Ok(entry) = self.serializer.deserialize(&bytes) else {
            self.driver.delete(key).await?;
            return Ok(false);
        };

        let expired = self.serializer.serialize(&entry.expire())?;
        let replaced = self.driver.replace_if(key, &bytes, expired).await?;
        if replaced {
            debug!(key = %key, "logically expired local entry");
        } else {
            debug!(key = %key, "local entry changed before it could be expired");
        }
        Ok(replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryDriver;
    use crate::entry::now_millis;
    use crate::serializer::JsonSerializer;
    use serde_json::json;

    fn local() -> LocalCache {
        LocalCache::new(MemoryDriver::new_shared(), Arc::new(JsonSerializer))
    }

    #[tokio::test]
    async fn test_logically_expire_keeps_value() {
        let local = local();
        let entry = CacheEntry::new(json!("v"), now_millis(), Some(now_millis() + 60_000), vec![]);
        local
            .write_entry("cache:k", &entry, Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(local.logically_expire("cache:k").await.unwrap());

        let stored = local.get("cache:k").await.unwrap().unwrap();
        assert!(stored.is_logically_expired());
        assert_eq!(stored.value(), &json!("v"));
        assert!(local.driver().remaining_ttl("cache:k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_logically_expire_does_not_clobber_newer_write() {
        let local = local();
        let old = CacheEntry::new(json!("old"), now_millis(), Some(now_millis() + 60_000), vec![]);
        let bytes = JsonSerializer.serialize(&old).unwrap();
        local.set("cache:k", bytes.clone(), None).await.unwrap();

        let newer = CacheEntry::new(json!("new"), now_millis(), Some(now_millis() + 60_000), vec![]);
        local.write_entry("cache:k", &newer, None).await.unwrap();

        // The expiration computed from the old bytes must not land.
        let expired = JsonSerializer.serialize(&old.expire()).unwrap();
        assert!(!local.driver().replace_if("cache:k", &bytes, expired).await.unwrap());

        let stored = local.get("cache:k").await.unwrap().unwrap();
        assert_eq!(stored.value(), &json!("new"));
        assert!(!stored.is_logically_expired());

        assert!(local.logically_expire("cache:k").await.unwrap());
        assert!(local.get("cache:k").await.unwrap().unwrap().is_logically_expired());
    }

    #[tokio::test]
    async fn test_logically_expire_missing_key() {
        assert!(!local().logically_expire("cache:nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_dropped() {
        let local = local();
        local.set("cache:bad", b"{oops".to_vec(), None).await.unwrap();

        assert!(local.get("cache:bad").await.unwrap().is_none());
        assert!(!local.has("cache:bad").await.unwrap());
    }
}
