//! Redis cache driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use futures_util::StreamExt;
use octofhir_cache::{CacheDriver, CacheError, CacheResult, DynDriver, KEY_SEPARATOR};
use redis::AsyncCommands;

/// Keys deleted per `DEL` when clearing a namespace.
const CLEAR_BATCH: usize = 500;

fn redis_error(operation: &str, e: redis::RedisError) -> CacheError {
    CacheError::driver(format!("redis {operation} failed: {e}"))
}

/// Remote tier backed by Redis.
///
/// Values are stored as raw bytes with `SET ... PX`, so expiry is native and
/// [`prune`](CacheDriver::prune) does nothing.
///
/// ## Example
///
/// ```ignore
/// use octofhir_cache_redis::{RedisConfig, RedisDriver};
///
/// let pool = RedisConfig::new("redis://localhost:6379").create_pool()?;
/// let driver = RedisDriver::new_shared(pool);
/// ```
#[derive(Clone)]
pub struct RedisDriver {
    pool: Pool,
    prefix: Option<String>,
}

impl RedisDriver {
    pub fn new(pool: Pool) -> Self {
        Self { pool, prefix: None }
    }

    pub fn new_shared(pool: Pool) -> DynDriver {
        Arc::new(Self::new(pool))
    }

    async fn conn(&self) -> CacheResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::driver(format!("failed to get Redis connection: {e}")))
    }

    /// Match pattern for every key in this driver's namespace.
    fn scan_pattern(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{KEY_SEPARATOR}*"),
            None => "*".to_string(),
        }
    }
}

impl std::fmt::Debug for RedisDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDriver")
            .field("prefix", &self.prefix)
            .field("pool", &self.pool.status())
            .finish()
    }
}

#[async_trait]
impl CacheDriver for RedisDriver {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| redis_error("GET", e))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        match ttl {
            // PX 0 is rejected by Redis.
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                conn.pset_ex::<_, _, ()>(key, value, millis)
                    .await
                    .map_err(|e| redis_error("SET PX", e))?;
            }
            None => {
                conn.set::<_, _, ()>(key, value)
                    .await
                    .map_err(|e| redis_error("SET", e))?;
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(key).await.map_err(|e| redis_error("DEL", e))?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<bool> {
        if keys.is_empty() {
            return Ok(false);
        }
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(keys).await.map_err(|e| redis_error("DEL", e))?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> CacheResult<()> {
        let pattern = self.scan_pattern();
        let mut conn = self.conn().await?;

        let keys: Vec<String> = {
            let iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(|e| redis_error("SCAN", e))?;
            iter.collect().await
        };

        for batch in keys.chunks(CLEAR_BATCH) {
            conn.del::<_, ()>(batch)
                .await
                .map_err(|e| redis_error("DEL", e))?;
        }

        tracing::debug!(pattern = %pattern, removed = keys.len(), "cleared Redis namespace");
        Ok(())
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(key).await.map_err(|e| redis_error("EXISTS", e))
    }

    async fn pull(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get_del::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| redis_error("GETDEL", e))
    }

    async fn remaining_ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.conn().await?;
        let millis: i64 = conn.pttl(key).await.map_err(|e| redis_error("PTTL", e))?;
        // -1: no expiry, -2: missing.
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    fn namespace(&self, name: &str) -> DynDriver {
        let prefix = match &self.prefix {
            Some(parent) => format!("{parent}{KEY_SEPARATOR}{name}"),
            None => name.to_string(),
        };
        Arc::new(Self {
            pool: self.pool.clone(),
            prefix: Some(prefix),
        })
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.pool.close();
        Ok(())
    }
}
