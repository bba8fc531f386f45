//! Remote (shared) tier guarded by the circuit breaker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::driver::DynDriver;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::options::CacheEntryOptions;
use crate::serializer::Serializer;

/// Remote tier.
///
/// Every driver call goes through [`guarded`](Self::guarded): an open breaker
/// short-circuits to the fallback, a failure trips the breaker and is then
/// either suppressed to the fallback or surfaced as `RemoteStore`.
#[derive(Debug, Clone)]
pub struct RemoteCache {
    driver: DynDriver,
    serializer: Arc<dyn Serializer>,
    breaker: Option<Arc<CircuitBreaker>>,
    has_local: bool,
}

impl RemoteCache {
    pub fn new(
        driver: DynDriver,
        serializer: Arc<dyn Serializer>,
        breaker: Option<Arc<CircuitBreaker>>,
        has_local: bool,
    ) -> Self {
        Self {
            driver,
            serializer,
            breaker,
            has_local,
        }
    }

    pub fn driver(&self) -> &DynDriver {
        &self.driver
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    fn should_suppress(&self, suppress: Option<bool>) -> bool {
        match suppress {
            Some(suppress) => suppress,
            None => self.has_local,
        }
    }

    async fn guarded<T, F>(
        &self,
        operation: &'static str,
        options: &CacheEntryOptions,
        fallback: T,
        call: F,
    ) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        if self.breaker.as_ref().is_some_and(|breaker| breaker.is_open()) {
            return Ok(fallback);
        }

        match call.await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(operation, error = %e, "remote store operation failed");
                if let Some(breaker) = &self.breaker {
                    breaker.open();
                }

                if self.should_suppress(options.suppress_remote_errors()) {
                    Ok(fallback)
                } else {
                    Err(CacheError::remote_store(operation, e))
                }
            }
        }
    }

    pub async fn get(
        &self,
        key: &str,
        options: &CacheEntryOptions,
    ) -> CacheResult<Option<CacheEntry>> {
        let bytes = self
            .guarded("get", options, None, self.driver.get(key))
            .await?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        match self.serializer.deserialize(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = %key, error = %e, "ignoring undecodable remote entry");
                Ok(None)
            }
        }
    }

    /// Store an already-serialized entry.
    pub async fn set(
        &self,
        key: &str,
        bytes: Vec<u8>,
        ttl: Option<Duration>,
        options: &CacheEntryOptions,
    ) -> CacheResult<bool> {
        self.guarded("set", options, false, self.driver.set(key, bytes, ttl))
            .await
    }

    pub async fn write_entry(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Option<Duration>,
        options: &CacheEntryOptions,
    ) -> CacheResult<bool> {
        let bytes = self.serializer.serialize(entry)?;
        self.set(key, bytes, ttl, options).await
    }

    pub async fn has(&self, key: &str, options: &CacheEntryOptions) -> CacheResult<bool> {
        self.guarded("has", options, false, self.driver.has(key))
            .await
    }

    pub async fn delete(&self, key: &str, options: &CacheEntryOptions) -> CacheResult<bool> {
        self.guarded("delete", options, false, self.driver.delete(key))
            .await
    }

    pub async fn delete_many(
        &self,
        keys: &[String],
        options: &CacheEntryOptions,
    ) -> CacheResult<bool> {
        self.guarded("delete_many", options, false, self.driver.delete_many(keys))
            .await
    }

    pub async fn clear_namespace(
        &self,
        namespace: &str,
        options: &CacheEntryOptions,
    ) -> CacheResult<()> {
        let view = self.driver.namespace(namespace);
        self.guarded("clear", options, (), view.clear()).await
    }

    /// Mark the shared entry stale while keeping its eviction time.
    pub async fn logically_expire(
        &self,
        key: &str,
        options: &CacheEntryOptions,
    ) -> CacheResult<bool> {
        let Some(entry) = self.get(key, options).await? else {
            return Ok(false);
        };

        let ttl = self
            .guarded("remaining_ttl", options, None, self.driver.remaining_ttl(key))
            .await?;
        self.write_entry(key, &entry.expire(), ttl, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultsConfig;
    use crate::driver::CacheDriver;
    use crate::options::CacheOptions;
    use crate::serializer::JsonSerializer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Driver whose every call fails and is counted.
    #[derive(Debug, Default)]
    struct DownDriver {
        calls: AtomicUsize,
    }

    impl DownDriver {
        fn fail<T>(&self) -> CacheResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::driver("connection refused"))
        }
    }

    #[async_trait]
    impl CacheDriver for DownDriver {
        async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
            self.fail()
        }
        async fn set(&self, _: &str, _: Vec<u8>, _: Option<Duration>) -> CacheResult<bool> {
            self.fail()
        }
        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            self.fail()
        }
        async fn delete_many(&self, _keys: &[String]) -> CacheResult<bool> {
            self.fail()
        }
        async fn clear(&self) -> CacheResult<()> {
            self.fail()
        }
        async fn remaining_ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
            self.fail()
        }
        fn namespace(&self, _name: &str) -> DynDriver {
            Arc::new(DownDriver::default())
        }
    }

    fn options(overrides: CacheOptions) -> CacheEntryOptions {
        CacheEntryOptions::resolve(&overrides, &DefaultsConfig::default())
    }

    #[tokio::test]
    async fn test_errors_suppressed_when_local_tier_exists() {
        let driver = Arc::new(DownDriver::default());
        let remote = RemoteCache::new(driver, Arc::new(JsonSerializer), None, true);

        let result = remote.get("k", &options(CacheOptions::new())).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_errors_surface_without_local_tier() {
        let driver = Arc::new(DownDriver::default());
        let remote = RemoteCache::new(driver, Arc::new(JsonSerializer), None, false);

        let err = remote
            .get("k", &options(CacheOptions::new()))
            .await
            .unwrap_err();
        assert!(err.is_remote_store());
    }

    #[tokio::test]
    async fn test_explicit_suppress_overrides_local_default() {
        let driver = Arc::new(DownDriver::default());
        let remote = RemoteCache::new(driver, Arc::new(JsonSerializer), None, true);

        let err = remote
            .delete("k", &options(CacheOptions::new().suppress_remote_errors(false)))
            .await
            .unwrap_err();
        assert!(err.is_remote_store());
    }

    #[tokio::test]
    async fn test_open_breaker_skips_calls() {
        let driver = Arc::new(DownDriver::default());
        let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(60)));
        let remote = RemoteCache::new(
            driver.clone(),
            Arc::new(JsonSerializer),
            Some(breaker.clone()),
            true,
        );
        let opts = options(CacheOptions::new());

        remote.get("k", &opts).await.unwrap();
        assert!(breaker.is_open());
        remote.get("k", &opts).await.unwrap();
        remote.has("k", &opts).await.unwrap();

        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_returns_fallback_even_when_not_suppressing() {
        let driver = Arc::new(DownDriver::default());
        let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(60)));
        let remote = RemoteCache::new(driver, Arc::new(JsonSerializer), Some(breaker), false);
        let opts = options(CacheOptions::new());

        assert!(remote.get("k", &opts).await.is_err());
        assert!(remote.get("k", &opts).await.unwrap().is_none());
    }
}
