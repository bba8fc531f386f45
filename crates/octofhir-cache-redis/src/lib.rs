//! # octofhir-cache-redis
//!
//! Redis backends for `octofhir-cache`:
//!
//! - [`RedisDriver`]: the shared remote tier, pooled through `deadpool-redis`
//! - [`RedisTransport`]: the invalidation bus over Redis Pub/Sub
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use octofhir_cache::{Cache, drivers::MemoryDriver};
//! use octofhir_cache_redis::{RedisConfig, RedisDriver, RedisTransport};
//!
//! let config = RedisConfig::new("redis://localhost:6379");
//! let pool = config.create_pool()?;
//!
//! let cache = Cache::builder()
//!     .local(MemoryDriver::new_shared())
//!     .remote(RedisDriver::new_shared(pool.clone()))
//!     .bus(Arc::new(RedisTransport::new(pool, config.url.clone())))
//!     .build()
//!     .await?;
//! ```

mod config;
mod driver;
mod transport;

pub use config::RedisConfig;
pub use driver::RedisDriver;
pub use transport::RedisTransport;
