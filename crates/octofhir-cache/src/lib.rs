//! # octofhir-cache
//!
//! Multi-tier read-through / write-through cache coordinator.
//!
//! A [`Cache`] sits in front of an in-process tier (local) and a shared tier
//! (remote), and keeps them coherent across processes with an invalidation
//! [`Bus`](bus::Bus).
//!
//! ## Overview
//!
//! - `get_or_set` runs a factory at most once per key per process while
//!   concurrent callers wait on a per-key lock
//! - Entries carry a logical TTL and a longer physical lifetime (grace), so
//!   a stale value can be served when the factory fails or is slow
//! - Soft timeouts fall back to the stale value and keep the factory running
//!   in the background; hard timeouts surface an error
//! - Writes fan out to both tiers and notify other nodes over the bus, which
//!   drops their local copies
//! - Tags invalidate lazily through timestamp markers
//! - A circuit breaker isolates the app from remote store outages
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use octofhir_cache::prelude::*;
//!
//! let cache = Cache::builder()
//!     .local(MemoryDriver::new_shared())
//!     .remote(redis_driver)
//!     .bus(redis_transport)
//!     .build()
//!     .await?;
//!
//! let patient: Patient = cache
//!     .get_or_set(
//!         "patient:123",
//!         || async move { storage.read_patient("123").await },
//!         CacheOptions::new()
//!             .ttl(Duration::from_secs(60))
//!             .grace(Duration::from_secs(6 * 3600))
//!             .tags(["patients"]),
//!     )
//!     .await?;
//!
//! cache.expire_by_tag(&["patients".to_string()]).await?;
//! ```
//!
//! ## Drivers
//!
//! Implement [`CacheDriver`] for a new backend. This crate ships the
//! in-memory [`MemoryDriver`](drivers::MemoryDriver); the Redis driver and bus
//! transport live in `octofhir-cache-redis`.

pub mod bus;
mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod driver;
pub mod drivers;
pub mod entry;
mod error;
pub mod events;
pub mod factory;
mod factory_runner;
mod get_set;
pub mod locks;
pub mod observer;
mod options;
pub mod serializer;
mod stack;
mod tags;
pub mod tiers;

pub use cache::{Cache, CacheBuilder};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::{
    BusConfig, CacheConfig, CircuitBreakerConfig, DefaultsConfig, RetryQueueConfig,
    SerializerKind,
};
pub use driver::{CacheDriver, DynDriver};
pub use entry::CacheEntry;
pub use error::{BoxError, CacheError, CacheResult, ErrorCategory};
pub use events::{CacheEvent, CacheEventBroadcaster, Tier};
pub use factory::{FactoryContext, FactoryOutcome};
pub use observer::{OperationInfo, OperationObserver};
pub use options::{CacheEntryOptions, CacheOptions, FactoryErrorHook, FactoryTimeout};

/// Separator between prefix, namespace and key segments.
pub const KEY_SEPARATOR: char = ':';

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_cache::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bus::{BusTransport, MemoryHub};
    pub use crate::drivers::MemoryDriver;
    pub use crate::{
        BoxError, Cache, CacheBuilder, CacheConfig, CacheDriver, CacheError, CacheEvent,
        CacheOptions, CacheResult, DynDriver, FactoryContext, FactoryOutcome,
    };
}
