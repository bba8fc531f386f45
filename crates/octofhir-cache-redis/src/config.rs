//! Redis connection settings.

use std::time::Duration;

use deadpool_redis::{Pool, PoolConfig, Runtime};
use octofhir_cache::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};

/// Redis connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Wait, create and recycle timeout for pooled connections
    #[serde(default = "default_redis_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout: default_redis_timeout(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build a connection pool.
    ///
    /// Connections are opened lazily, so an unreachable server is only
    /// reported by the first command.
    pub fn create_pool(&self) -> CacheResult<Pool> {
        let mut pool_config = PoolConfig::new(self.pool_size);
        pool_config.timeouts.wait = Some(self.timeout);
        pool_config.timeouts.create = Some(self.timeout);
        pool_config.timeouts.recycle = Some(self.timeout);

        let mut redis_config = deadpool_redis::Config::from_url(&self.url);
        redis_config.pool = Some(pool_config);

        redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::config(format!("failed to create Redis pool: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: RedisConfig = serde_json::from_value(serde_json::json!({
            "url": "redis://cache:6380",
            "timeout": "250ms"
        }))
        .unwrap();

        assert_eq!(config.url, "redis://cache:6380");
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        let pool = RedisConfig::new("redis://127.0.0.1:1").create_pool().unwrap();
        assert_eq!(pool.status().max_size, 10);
    }
}
