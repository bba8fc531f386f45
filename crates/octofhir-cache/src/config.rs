//! Cache configuration.
//!
//! Configuration is plain serde data so it can be embedded in a larger
//! application config or loaded on its own from TOML. Durations use
//! human-readable strings (`"100ms"`, `"6h"`).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::serializer::{JsonSerializer, MsgPackSerializer, Serializer};

/// Root cache configuration.
///
/// # Example (TOML)
///
/// ```toml
/// prefix = "app"
///
/// [defaults]
/// ttl = "10m"
/// grace = "6h"
/// grace_backoff = "30s"
///
/// [circuit_breaker]
/// enabled = true
/// break_duration = "30s"
///
/// [bus.retry_queue]
/// max_size = 1000
/// retry_interval = "2s"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix for every key written by this store.
    pub prefix: String,

    /// Codec used for entries.
    pub serializer: SerializerKind,

    /// Store-wide option defaults.
    pub defaults: DefaultsConfig,

    /// Remote-store failure isolation.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Cross-process invalidation bus.
    pub bus: BusConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "cache".to_string(),
            serializer: SerializerKind::Json,
            defaults: DefaultsConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            bus: BusConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> CacheResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| CacheError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` if:
    /// - The prefix is empty or contains the key separator
    /// - The bus id length is zero
    /// - The retry interval or retry queue size is zero
    pub fn validate(&self) -> CacheResult<()> {
        if self.prefix.is_empty() {
            return Err(CacheError::config("prefix cannot be empty"));
        }

        if self.prefix.contains(crate::KEY_SEPARATOR) {
            return Err(CacheError::config(format!(
                "prefix '{}' cannot contain '{}'",
                self.prefix,
                crate::KEY_SEPARATOR
            )));
        }

        if self.bus.id_length == 0 {
            return Err(CacheError::config("bus.id_length must be > 0"));
        }

        if self.bus.retry_queue.retry_interval.is_zero() {
            return Err(CacheError::config(
                "bus.retry_queue.retry_interval must be > 0",
            ));
        }

        if self.bus.retry_queue.max_size == Some(0) {
            return Err(CacheError::config("bus.retry_queue.max_size must be > 0"));
        }

        Ok(())
    }
}

/// Entry codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    Json,
    #[serde(alias = "messagepack")]
    MsgPack,
}

impl SerializerKind {
    pub fn build(self) -> Arc<dyn Serializer> {
        match self {
            Self::Json => Arc::new(JsonSerializer),
            Self::MsgPack => Arc::new(MsgPackSerializer),
        }
    }
}

/// Defaults merged under every call-site [`CacheOptions`](crate::CacheOptions).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Logical TTL. `None` never goes stale.
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Grace period after logical expiration; zero disables grace.
    #[serde(with = "humantime_serde")]
    pub grace: Duration,

    /// How long a graced value is served before retrying a failing factory.
    #[serde(with = "humantime_serde")]
    pub grace_backoff: Duration,

    /// Soft factory timeout. Zero means stale-while-revalidate.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Hard factory timeout.
    #[serde(with = "humantime_serde")]
    pub hard_timeout: Option<Duration>,

    /// Maximum wait for the per-key lock.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Option<Duration>,

    /// Remote error suppression. Unset suppresses when a local tier exists.
    pub suppress_remote_errors: Option<bool>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(30 * 60)), // 30 minutes
            grace: Duration::ZERO,
            grace_backoff: Duration::from_secs(10),
            timeout: Some(Duration::ZERO),
            hard_timeout: None,
            lock_timeout: None,
            suppress_remote_errors: None,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,

    /// How long remote calls are short-circuited after a failure.
    #[serde(with = "humantime_serde")]
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            break_duration: Duration::from_secs(60),
        }
    }
}

/// Bus configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Transport channel shared by every node of the store.
    pub channel: String,

    /// Fixed width of the node id on the wire.
    pub id_length: usize,

    pub retry_queue: RetryQueueConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel: "octofhir-cache:bus".to_string(),
            id_length: 24,
            retry_queue: RetryQueueConfig::default(),
        }
    }
}

/// Retry queue for publishes that failed while the transport was down.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryQueueConfig {
    pub enabled: bool,

    /// Oldest messages are dropped beyond this size. `None` is unbounded.
    pub max_size: Option<usize>,

    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: None,
            retry_interval: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.id_length, 24);
        assert_eq!(config.bus.retry_queue.retry_interval, Duration::from_secs(2));
        assert!(!config.circuit_breaker.enabled);
    }

    #[test]
    fn test_parse_toml() {
        let config = CacheConfig::from_toml_str(
            r#"
            prefix = "app"
            serializer = "msgpack"

            [defaults]
            ttl = "100ms"
            grace = "6h"

            [circuit_breaker]
            enabled = true
            break_duration = "30s"

            [bus.retry_queue]
            max_size = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.prefix, "app");
        assert_eq!(config.serializer, SerializerKind::MsgPack);
        assert_eq!(config.defaults.ttl, Some(Duration::from_millis(100)));
        assert_eq!(config.defaults.grace, Duration::from_secs(6 * 3600));
        assert_eq!(config.defaults.grace_backoff, Duration::from_secs(10));
        assert_eq!(config.circuit_breaker.break_duration, Duration::from_secs(30));
        assert_eq!(config.bus.retry_queue.max_size, Some(20));
        assert!(config.bus.retry_queue.enabled);
    }

    #[test]
    fn test_empty_prefix_fails_validation() {
        let config = CacheConfig {
            prefix: String::new(),
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prefix_with_separator_fails_validation() {
        let err = CacheConfig::from_toml_str(r#"prefix = "a:b""#).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn test_zero_queue_size_fails_validation() {
        let mut config = CacheConfig::default();
        config.bus.retry_queue.max_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = CacheConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.prefix, config.prefix);
        assert_eq!(parsed.defaults.ttl, config.defaults.ttl);
        assert_eq!(parsed.bus.channel, config.bus.channel);
    }
}
