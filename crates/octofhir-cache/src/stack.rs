//! Write fan-out across the local tier, the remote tier and the bus.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::KEY_SEPARATOR;
use crate::bus::{Bus, BusMessage};
use crate::config::DefaultsConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, CacheEventBroadcaster};
use crate::options::{CacheEntryOptions, CacheOptions};
use crate::serializer::Serializer;
use crate::tiers::{LocalCache, RemoteCache};

/// The tiers and bus of one store, scoped to a key prefix.
///
/// Methods take keys relative to the prefix. Tiers and bus messages always
/// see fully-qualified keys.
#[derive(Debug, Clone)]
pub struct CacheStack {
    name: String,
    prefix: String,
    local: Option<LocalCache>,
    remote: Option<RemoteCache>,
    bus: Option<Arc<Bus>>,
    defaults: Arc<DefaultsConfig>,
    serializer: Arc<dyn Serializer>,
    events: CacheEventBroadcaster,
}

impl CacheStack {
    pub fn new(
        prefix: impl Into<String>,
        defaults: Arc<DefaultsConfig>,
        serializer: Arc<dyn Serializer>,
        events: CacheEventBroadcaster,
    ) -> Self {
        let prefix = prefix.into();
        Self {
            name: prefix.clone(),
            prefix,
            local: None,
            remote: None,
            bus: None,
            defaults,
            serializer,
            events,
        }
    }

    #[must_use]
    pub fn with_local(mut self, local: LocalCache) -> Self {
        self.local = Some(local);
        self
    }

    #[must_use]
    pub fn with_remote(mut self, remote: RemoteCache) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: Arc<Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Child stack sharing tiers and bus, with `name` appended to the prefix.
    pub fn namespace(&self, name: &str) -> Self {
        Self {
            prefix: format!("{}{KEY_SEPARATOR}{name}", self.prefix),
            ..self.clone()
        }
    }

    /// Store label used in events.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn full_key(&self, key: &str) -> String {
        format!("{}{KEY_SEPARATOR}{key}", self.prefix)
    }

    pub fn local(&self) -> Option<&LocalCache> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&RemoteCache> {
        self.remote.as_ref()
    }

    pub fn bus(&self) -> Option<&Arc<Bus>> {
        self.bus.as_ref()
    }

    pub fn events(&self) -> &CacheEventBroadcaster {
        &self.events
    }

    pub fn defaults(&self) -> &DefaultsConfig {
        &self.defaults
    }

    /// Merge call-site overrides onto the store defaults.
    pub fn resolve(&self, options: &CacheOptions) -> CacheEntryOptions {
        CacheEntryOptions::resolve(options, &self.defaults)
    }

    async fn notify(&self, message: BusMessage, options: &CacheEntryOptions) {
        if options.skip_bus_notify() {
            return;
        }
        if let Some(bus) = &self.bus {
            bus.publish(message).await;
        }
    }

    /// Write `value` to every tier and notify other nodes.
    ///
    /// `None` is the absent marker and is rejected; `Some(Value::Null)` is a
    /// valid cached value. The bus is notified even when the remote write
    /// failed, and that failure is returned afterwards.
    pub async fn set(
        &self,
        key: &str,
        value: Option<Value>,
        options: &CacheEntryOptions,
    ) -> CacheResult<bool> {
        let Some(value) = value else {
            return Err(CacheError::undefined_value(key));
        };

        let full_key = self.full_key(key);
        let entry = CacheEntry::from_options(value, options);
        let bytes = self.serializer.serialize(&entry)?;

        if let Some(local) = &self.local {
            if options.skip_local_write() {
                local.delete(&full_key).await?;
            } else {
                local
                    .set(&full_key, bytes.clone(), options.physical_ttl())
                    .await?;
            }
        }

        let remote_result = match &self.remote {
            Some(remote) if !options.skip_remote_write() => {
                remote
                    .set(&full_key, bytes, options.physical_ttl(), options)
                    .await
            }
            _ => Ok(true),
        };

        self.notify(BusMessage::set(vec![full_key], &self.prefix), options)
            .await;

        let written = remote_result?;
        debug!(key = %key, store = %self.name, "cache written");
        self.events.emit_with(|| CacheEvent::Written {
            key: key.to_string(),
            value: entry.into_value(),
            store: self.name.clone(),
        });
        Ok(written)
    }

    /// Write an existing entry back as-is, e.g. after applying a grace backoff.
    pub async fn write_entry(
        &self,
        key: &str,
        entry: &CacheEntry,
        options: &CacheEntryOptions,
    ) -> CacheResult<bool> {
        let full_key = self.full_key(key);
        match (&self.local, &self.remote) {
            (Some(local), _) => local.write_entry(&full_key, entry, options.physical_ttl()).await,
            (None, Some(remote)) => {
                remote
                    .write_entry(&full_key, entry, options.physical_ttl(), options)
                    .await
            }
            (None, None) => Ok(false),
        }
    }

    pub async fn delete(&self, key: &str, options: &CacheEntryOptions) -> CacheResult<bool> {
        self.delete_many(&[key.to_string()], options).await
    }

    /// Delete keys from every tier. `cache:deleted` is emitted per key even
    /// when the remote delete failed.
    pub async fn delete_many(
        &self,
        keys: &[String],
        options: &CacheEntryOptions,
    ) -> CacheResult<bool> {
        if keys.is_empty() {
            return Ok(false);
        }

        let full_keys: Vec<String> = keys.iter().map(|key| self.full_key(key)).collect();

        let mut deleted = false;
        if let Some(local) = &self.local {
            deleted |= local.delete_many(&full_keys).await?;
        }

        let remote_result = match &self.remote {
            Some(remote) => remote.delete_many(&full_keys, options).await,
            None => Ok(false),
        };

        self.notify(BusMessage::delete(full_keys, &self.prefix), options)
            .await;

        for key in keys {
            debug!(key = %key, store = %self.name, "cache deleted");
            self.events.emit_with(|| CacheEvent::Deleted {
                key: key.clone(),
                store: self.name.clone(),
            });
        }

        Ok(remote_result? || deleted)
    }

    /// Logically expire `key` everywhere, keeping graced copies.
    pub async fn expire(&self, key: &str, options: &CacheEntryOptions) -> CacheResult<bool> {
        let full_key = self.full_key(key);

        let mut expired = false;
        if let Some(local) = &self.local {
            expired |= local.logically_expire(&full_key).await?;
        }

        let remote_result = match &self.remote {
            Some(remote) => remote.logically_expire(&full_key, options).await,
            None => Ok(false),
        };

        self.notify(BusMessage::set(vec![full_key], &self.prefix), options)
            .await;

        Ok(remote_result? || expired)
    }

    /// Remove every key under this stack's prefix.
    pub async fn clear(&self, options: &CacheEntryOptions) -> CacheResult<()> {
        if let Some(local) = &self.local {
            local.clear_namespace(&self.prefix).await?;
        }

        let remote_result = match &self.remote {
            Some(remote) => remote.clear_namespace(&self.prefix, options).await,
            None => Ok(()),
        };

        self.notify(BusMessage::clear(&self.prefix), options).await;

        debug!(store = %self.name, namespace = %self.prefix, "cache cleared");
        self.events.emit_with(|| CacheEvent::Cleared {
            store: self.name.clone(),
        });
        remote_result
    }

    pub async fn has(&self, key: &str, options: &CacheEntryOptions) -> CacheResult<bool> {
        let full_key = self.full_key(key);
        if let Some(local) = &self.local {
            if local.has(&full_key).await? {
                return Ok(true);
            }
        }
        match &self.remote {
            Some(remote) => remote.has(&full_key, options).await,
            None => Ok(false),
        }
    }
}
