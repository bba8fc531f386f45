//! Storage driver contract.
//!
//! The coordinator owns no storage. Local and remote tiers are both plain
//! key/value drivers holding serialized entries under fully-qualified keys.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Type alias for a shared driver trait object.
pub type DynDriver = Arc<dyn CacheDriver>;

/// Key/value driver backing a cache tier.
///
/// Implementations must be thread-safe (`Send + Sync`). A driver returned by
/// [`namespace`](CacheDriver::namespace) shares storage with its parent and
/// only scopes [`clear`](CacheDriver::clear); keys passed to every other
/// method are already fully qualified.
#[async_trait]
pub trait CacheDriver: Send + Sync + std::fmt::Debug {
    /// Returns the stored bytes, or `None` if missing or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Stores bytes under `key`. `None` keeps the value until deleted.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Removes `key`. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Removes every key in `keys`.
    async fn delete_many(&self, keys: &[String]) -> CacheResult<bool>;

    /// Removes every key in this driver's namespace.
    async fn clear(&self) -> CacheResult<()>;

    async fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Returns the value and removes it.
    async fn pull(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }

    /// Replaces the value of `key` only while it still holds `current`,
    /// keeping its expiry. Returns `false` when the key changed or is gone.
    ///
    /// The provided version reads then writes; drivers that can compare and
    /// swap atomically override it.
    async fn replace_if(&self, key: &str, current: &[u8], value: Vec<u8>) -> CacheResult<bool> {
        match self.get(key).await? {
            Some(stored) if stored == current => {
                let ttl = self.remaining_ttl(key).await?;
                self.set(key, value, ttl).await
            }
            _ => Ok(false),
        }
    }

    /// Remaining physical lifetime of `key`. `None` when it never expires or
    /// does not exist.
    async fn remaining_ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Returns a view scoped to `name` that shares the underlying storage.
    fn namespace(&self, name: &str) -> DynDriver;

    /// Drops expired rows. Only drivers without native expiry do anything.
    async fn prune(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> CacheResult<()> {
        Ok(())
    }
}
