//! Public cache facade.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::bus::{Bus, BusTransport};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::CacheConfig;
use crate::driver::DynDriver;
use crate::error::{BoxError, CacheError, CacheResult};
use crate::events::{CacheEvent, CacheEventBroadcaster};
use crate::factory::{FactoryContext, FactoryOutcome, boxed_factory};
use crate::get_set::GetSetHandler;
use crate::locks::Locks;
use crate::observer::{OperationInfo, OperationObserver};
use crate::options::CacheOptions;
use crate::stack::CacheStack;
use crate::tiers::{LocalCache, RemoteCache};

fn to_value<T: Serialize>(value: &T) -> CacheResult<Value> {
    serde_json::to_value(value).map_err(|e| CacheError::serialization(e.to_string()))
}

fn from_value<T: DeserializeOwned>(value: Value) -> CacheResult<T> {
    serde_json::from_value(value).map_err(|e| CacheError::serialization(e.to_string()))
}

/// Drivers shared by a root cache and all its namespaces.
#[derive(Debug)]
struct Shared {
    local: Option<DynDriver>,
    remote: Option<DynDriver>,
    bus: Option<Arc<Bus>>,
}

/// Multi-tier cache.
///
/// Cheap to clone. Keys are relative to the cache's namespace.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use octofhir_cache::{Cache, CacheOptions, drivers::MemoryDriver};
///
/// # async fn example() -> octofhir_cache::CacheResult<()> {
/// let cache = Cache::builder()
///     .local(MemoryDriver::new_shared())
///     .build()
///     .await?;
///
/// let name: String = cache
///     .get_or_set(
///         "user:1:name",
///         || async { Ok::<_, std::io::Error>("Ada".to_string()) },
///         CacheOptions::new().ttl(Duration::from_secs(60)),
///     )
///     .await?;
/// assert_eq!(name, "Ada");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Cache {
    handler: Arc<GetSetHandler>,
    shared: Arc<Shared>,
    observer: Option<Arc<dyn OperationObserver>>,
}

impl Cache {
    pub fn builder() -> CacheBuilder {
        CacheBuilder::default()
    }

    fn stack(&self) -> &CacheStack {
        self.handler.stack()
    }

    /// Qualified prefix of this cache, e.g. `cache:users`.
    pub fn prefix(&self) -> &str {
        self.stack().prefix()
    }

    /// This node's bus id, when a bus is configured.
    pub fn bus_id(&self) -> Option<&str> {
        self.shared.bus.as_deref().map(Bus::id)
    }

    /// The bus, when configured.
    pub fn bus(&self) -> Option<&Arc<Bus>> {
        self.shared.bus.as_ref()
    }

    /// Subscribe to cache events.
    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.stack().events().subscribe()
    }

    async fn observed<T, F>(&self, operation: &'static str, key: Option<&str>, call: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        let Some(observer) = &self.observer else {
            return call.await;
        };

        let info = OperationInfo {
            operation,
            key,
            store: self.stack().name(),
        };
        observer.on_operation_start(&info);
        let result = call.await;
        observer.on_operation_end(&info, result.as_ref().map(|_| ()));
        result
    }

    /// Child cache whose keys live under `name`. Shares tiers, bus and locks.
    pub fn namespace(&self, name: &str) -> Cache {
        let stack = Arc::new(self.stack().namespace(name));
        Cache {
            handler: Arc::new(GetSetHandler::new(stack, Arc::clone(self.handler.locks()))),
            shared: Arc::clone(&self.shared),
            observer: self.observer.clone(),
        }
    }

    #[instrument(skip(self), fields(prefix = %self.prefix()))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        self.get_with(key, CacheOptions::new()).await
    }

    /// Read with per-call options (grace, suppression).
    #[instrument(skip(self, options), fields(prefix = %self.prefix()))]
    pub async fn get_with<T: DeserializeOwned>(
        &self,
        key: &str,
        options: CacheOptions,
    ) -> CacheResult<Option<T>> {
        self.observed("get", Some(key), async {
            let options = self.stack().resolve(&options);
            match self.handler.get(key, &options).await? {
                Some(value) => Ok(Some(from_value(value)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Read `key`, returning `default` on a miss.
    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> CacheResult<T> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Return the cached value, computing and caching it on a miss.
    ///
    /// Concurrent calls for the same key run `factory` once.
    #[instrument(skip(self, factory, options), fields(prefix = %self.prefix()))]
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        options: CacheOptions,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let value = self
            .get_or_set_with_context(
                key,
                move |_| async move { factory().await.map(FactoryOutcome::Value) },
                options,
            )
            .await?;

        // Plain factories never skip.
        value.ok_or_else(|| CacheError::undefined_value(key))
    }

    /// [`get_or_set`](Self::get_or_set) with a value that never goes stale.
    pub async fn get_or_set_forever<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        options: CacheOptions,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.get_or_set(key, factory, options.forever()).await
    }

    /// Like [`get_or_set`](Self::get_or_set), but the factory sees the stale
    /// value and may return [`FactoryOutcome::Skip`]. A skip yields `None`.
    #[instrument(skip(self, factory, options), fields(prefix = %self.prefix()))]
    pub async fn get_or_set_with_context<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        options: CacheOptions,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(FactoryContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<FactoryOutcome<T>, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.observed("get_or_set", Some(key), async {
            let options = self.stack().resolve(&options);
            let factory = boxed_factory(move |ctx| async move {
                match factory(ctx).await.map_err(Into::<BoxError>::into)? {
                    FactoryOutcome::Value(value) => {
                        let value = serde_json::to_value(&value).map_err(BoxError::from)?;
                        Ok(FactoryOutcome::Value(value))
                    }
                    FactoryOutcome::Skip => Ok(FactoryOutcome::Skip),
                }
            });

            match self.handler.handle(key, factory, &options).await? {
                FactoryOutcome::Value(value) => Ok(Some(from_value(value)?)),
                FactoryOutcome::Skip => Ok(None),
            }
        })
        .await
    }

    #[instrument(skip(self, value, options), fields(prefix = %self.prefix()))]
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: CacheOptions,
    ) -> CacheResult<bool> {
        self.observed("set", Some(key), async {
            let options = self.stack().resolve(&options);
            self.stack().set(key, Some(to_value(value)?), &options).await
        })
        .await
    }

    pub async fn set_forever<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: CacheOptions,
    ) -> CacheResult<bool> {
        self.set(key, value, options.forever()).await
    }

    #[instrument(skip(self), fields(prefix = %self.prefix()))]
    pub async fn has(&self, key: &str) -> CacheResult<bool> {
        self.observed("has", Some(key), async {
            let options = self.stack().resolve(&CacheOptions::new());
            self.stack().has(key, &options).await
        })
        .await
    }

    pub async fn missing(&self, key: &str) -> CacheResult<bool> {
        Ok(!self.has(key).await?)
    }

    /// Read `key` and delete it.
    #[instrument(skip(self), fields(prefix = %self.prefix()))]
    pub async fn pull<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let value = self.get(key).await?;
        self.delete(key).await?;
        Ok(value)
    }

    #[instrument(skip(self), fields(prefix = %self.prefix()))]
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.observed("delete", Some(key), async {
            let options = self.stack().resolve(&CacheOptions::new());
            self.stack().delete(key, &options).await
        })
        .await
    }

    #[instrument(skip(self, keys), fields(prefix = %self.prefix(), count = keys.len()))]
    pub async fn delete_many(&self, keys: &[String]) -> CacheResult<bool> {
        self.observed("delete_many", None, async {
            let options = self.stack().resolve(&CacheOptions::new());
            self.stack().delete_many(keys, &options).await
        })
        .await
    }

    /// Mark `key` stale on every tier and node while keeping graced copies.
    #[instrument(skip(self), fields(prefix = %self.prefix()))]
    pub async fn expire(&self, key: &str) -> CacheResult<bool> {
        self.observed("expire", Some(key), async {
            let options = self.stack().resolve(&CacheOptions::new());
            self.stack().expire(key, &options).await
        })
        .await
    }

    /// Remove every key of this namespace.
    #[instrument(skip(self), fields(prefix = %self.prefix()))]
    pub async fn clear(&self) -> CacheResult<()> {
        self.observed("clear", None, async {
            let options = self.stack().resolve(&CacheOptions::new());
            self.stack().clear(&options).await
        })
        .await
    }

    /// Expire every entry carrying any of `tags`, as of now.
    #[instrument(skip(self), fields(prefix = %self.prefix()))]
    pub async fn expire_by_tag(&self, tags: &[String]) -> CacheResult<()> {
        self.observed("expire_by_tag", None, async {
            self.handler.tags().expire_by_tag(&self.handler, tags).await
        })
        .await
    }

    /// Delete every entry carrying any of `tags`, as of now.
    #[instrument(skip(self), fields(prefix = %self.prefix()))]
    pub async fn delete_by_tag(&self, tags: &[String]) -> CacheResult<()> {
        self.observed("delete_by_tag", None, async {
            self.handler.tags().delete_by_tag(&self.handler, tags).await
        })
        .await
    }

    /// Drop expired rows from drivers without native expiry, and idle locks.
    pub async fn prune(&self) -> CacheResult<()> {
        if let Some(local) = &self.shared.local {
            local.prune().await?;
        }
        if let Some(remote) = &self.shared.remote {
            remote.prune().await?;
        }
        let pruned = self.handler.locks().prune_idle();
        tracing::debug!(pruned_locks = pruned, "cache pruned");
        Ok(())
    }

    /// Stop the bus and disconnect the drivers.
    pub async fn disconnect(&self) -> CacheResult<()> {
        if let Some(bus) = &self.shared.bus {
            bus.disconnect().await?;
        }
        if let Some(local) = &self.shared.local {
            local.disconnect().await?;
        }
        if let Some(remote) = &self.shared.remote {
            remote.disconnect().await?;
        }
        info!(prefix = %self.prefix(), "cache disconnected");
        Ok(())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("prefix", &self.prefix())
            .field("local", &self.shared.local.is_some())
            .field("remote", &self.shared.remote.is_some())
            .field("bus", &self.bus_id())
            .finish()
    }
}

/// Builder for [`Cache`].
#[derive(Default)]
pub struct CacheBuilder {
    config: CacheConfig,
    local: Option<DynDriver>,
    remote: Option<DynDriver>,
    transport: Option<Arc<dyn BusTransport>>,
    bus_id: Option<String>,
    events: Option<CacheEventBroadcaster>,
    observer: Option<Arc<dyn OperationObserver>>,
}

impl CacheBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local(mut self, driver: DynDriver) -> Self {
        self.local = Some(driver);
        self
    }

    pub fn remote(mut self, driver: DynDriver) -> Self {
        self.remote = Some(driver);
        self
    }

    /// Enable the invalidation bus over `transport`.
    pub fn bus(mut self, transport: Arc<dyn BusTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Fix the node's bus id instead of generating one.
    pub fn bus_id(mut self, id: impl Into<String>) -> Self {
        self.bus_id = Some(id.into());
        self
    }

    pub fn events(mut self, events: CacheEventBroadcaster) -> Self {
        self.events = Some(events);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn OperationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validate the configuration, wire the tiers and subscribe the bus.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` for invalid configuration or when no
    /// driver is given, and transport errors from subscribing the bus.
    pub async fn build(self) -> CacheResult<Cache> {
        self.config.validate()?;
        if self.local.is_none() && self.remote.is_none() {
            return Err(CacheError::config(
                "at least one of the local or remote drivers is required",
            ));
        }

        let config = self.config;
        let serializer = config.serializer.build();
        let events = self.events.unwrap_or_default();

        let local = self
            .local
            .clone()
            .map(|driver| LocalCache::new(driver, Arc::clone(&serializer)));

        let mut stack = CacheStack::new(
            config.prefix.clone(),
            Arc::new(config.defaults.clone()),
            Arc::clone(&serializer),
            events.clone(),
        );

        if let Some(local) = &local {
            stack = stack.with_local(local.clone());
        }

        if let Some(driver) = &self.remote {
            let breaker = config
                .circuit_breaker
                .enabled
                .then(|| Arc::new(CircuitBreaker::new(config.circuit_breaker.break_duration)));
            stack = stack.with_remote(RemoteCache::new(
                Arc::clone(driver),
                Arc::clone(&serializer),
                breaker,
                local.is_some(),
            ));
        }

        let bus = match self.transport {
            Some(transport) => {
                let mut bus = Bus::new(&config.bus, transport, local, events);
                if let Some(id) = self.bus_id {
                    bus = bus.with_id(id);
                }
                let bus = Arc::new(bus);
                bus.subscribe().await?;
                stack = stack.with_bus(Arc::clone(&bus));
                Some(bus)
            }
            None => None,
        };

        info!(
            prefix = %config.prefix,
            local = self.local.is_some(),
            remote = self.remote.is_some(),
            bus = bus.is_some(),
            "cache initialized"
        );

        Ok(Cache {
            handler: Arc::new(GetSetHandler::new(Arc::new(stack), Arc::new(Locks::new()))),
            shared: Arc::new(Shared {
                local: self.local,
                remote: self.remote,
                bus,
            }),
            observer: self.observer,
        })
    }
}
