//! Get-or-set orchestration.
//!
//! ## Lookup Order
//!
//! ```text
//! CheckLocal ─hit─► return
//!     │miss/stale
//!     ▼
//! AcquireLock ─timeout─► stale value (graced) or LockTimeout
//!     │
//!     ▼
//! CheckAfterLock (local, then remote) ─hit─► release, backfill, return
//!     │miss/stale
//!     ▼
//! RunFactory ─ok─► return
//!     │error
//!     ▼
//! ReturnStaleOrThrow
//! ```
//!
//! The two-tier variant is used whenever a local tier exists; the single-tier
//! variant runs the same machine against the remote tier only.

mod single_tier;
mod two_tier;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, Tier};
use crate::factory::{BoxFactory, FactoryOutcome};
use crate::factory_runner::FactoryRunner;
use crate::locks::Locks;
use crate::options::CacheEntryOptions;
use crate::stack::CacheStack;
use crate::tags::{TagSystem, TagVerdict};

/// An entry read from a tier, after tag checks.
struct Candidate {
    entry: CacheEntry,
    fresh: bool,
}

/// A stale entry usable as a graced fallback.
struct StaleEntry {
    entry: CacheEntry,
    tier: Tier,
}

/// Read path of one store namespace.
#[derive(Debug)]
pub struct GetSetHandler {
    stack: Arc<CacheStack>,
    locks: Arc<Locks>,
    runner: FactoryRunner,
    tags: TagSystem,
}

impl GetSetHandler {
    pub fn new(stack: Arc<CacheStack>, locks: Arc<Locks>) -> Self {
        let tags = TagSystem::new(stack.defaults());
        Self {
            runner: FactoryRunner::new(Arc::clone(&stack)),
            stack,
            locks,
            tags,
        }
    }

    pub fn stack(&self) -> &Arc<CacheStack> {
        &self.stack
    }

    pub fn locks(&self) -> &Arc<Locks> {
        &self.locks
    }

    pub fn tags(&self) -> &TagSystem {
        &self.tags
    }

    /// Return the cached value for `key`, computing it with `factory` on a miss.
    ///
    /// Boxed so tag checks can re-enter it for marker keys.
    pub fn handle<'a>(
        &'a self,
        key: &'a str,
        factory: BoxFactory,
        options: &'a CacheEntryOptions,
    ) -> BoxFuture<'a, CacheResult<FactoryOutcome<Value>>> {
        Box::pin(async move {
            match self.stack.local() {
                Some(local) => self.handle_two_tier(local, key, factory, options).await,
                None => self.handle_single_tier(key, factory, options).await,
            }
        })
    }

    /// Read without computing. Serves graced values when grace is enabled.
    pub async fn get(&self, key: &str, options: &CacheEntryOptions) -> CacheResult<Option<Value>> {
        let full_key = self.stack.full_key(key);
        let mut stale = None;

        if let Some(local) = self.stack.local() {
            if let Some(entry) = local.get(&full_key).await? {
                match self.inspect(key, entry, options).await? {
                    Some(c) if c.fresh => {
                        return Ok(self.hit(key, c.entry, Tier::Local, false).into_option());
                    }
                    Some(c) => {
                        stale = Some(StaleEntry {
                            entry: c.entry,
                            tier: Tier::Local,
                        })
                    }
                    None => {}
                }
            }
        }

        if let Some(remote) = self.stack.remote() {
            if let Some(entry) = remote.get(&full_key, options).await? {
                match self.inspect(key, entry, options).await? {
                    Some(c) if c.fresh => {
                        self.backfill(&full_key, &c.entry, options).await;
                        return Ok(self.hit(key, c.entry, Tier::Remote, false).into_option());
                    }
                    Some(c) if stale.is_none() => {
                        stale = Some(StaleEntry {
                            entry: c.entry,
                            tier: Tier::Remote,
                        })
                    }
                    _ => {}
                }
            }
        }

        if options.is_grace_enabled() {
            if let Some(StaleEntry { entry, tier }) = stale {
                return Ok(self.hit(key, entry, tier, true).into_option());
            }
        }

        self.miss(key);
        Ok(None)
    }

    /// Apply tag invalidation to an entry read from a tier.
    ///
    /// Returns `None` when a deletion marker removed the entry.
    async fn inspect(
        &self,
        key: &str,
        entry: CacheEntry,
        options: &CacheEntryOptions,
    ) -> CacheResult<Option<Candidate>> {
        let fresh = !entry.is_logically_expired();
        if entry.tags().is_empty() || TagSystem::is_marker_key(key) {
            return Ok(Some(Candidate { entry, fresh }));
        }

        match self.tags.verdict(self, &entry).await? {
            TagVerdict::Valid => Ok(Some(Candidate { entry, fresh })),
            TagVerdict::Expired => {
                if fresh {
                    debug!(key = %key, "entry invalidated by tag");
                    self.stack.expire(key, options).await?;
                }
                Ok(Some(Candidate {
                    entry: entry.expire(),
                    fresh: false,
                }))
            }
            TagVerdict::Deleted => {
                debug!(key = %key, "entry deleted by tag");
                self.stack.delete(key, options).await?;
                Ok(None)
            }
        }
    }

    /// Copy a remote hit into the local tier.
    async fn backfill(&self, full_key: &str, entry: &CacheEntry, options: &CacheEntryOptions) {
        if let Some(local) = self.stack.local() {
            if let Err(e) = local
                .write_entry(full_key, entry, options.physical_ttl())
                .await
            {
                warn!(key = %full_key, error = %e, "failed to backfill local tier");
            }
        }
    }

    fn hit(&self, key: &str, entry: CacheEntry, tier: Tier, graced: bool) -> FactoryOutcome<Value> {
        debug!(key = %key, %tier, graced, "cache hit");
        let value = entry.into_value();
        self.stack.events().emit_with(|| CacheEvent::Hit {
            key: key.to_string(),
            value: value.clone(),
            store: self.stack.name().to_string(),
            tier,
            graced,
        });
        FactoryOutcome::Value(value)
    }

    fn miss(&self, key: &str) {
        debug!(key = %key, "cache miss");
        self.stack.events().emit_with(|| CacheEvent::Miss {
            key: key.to_string(),
            store: self.stack.name().to_string(),
        });
    }

    /// Turn a factory failure into a graced hit when a stale value allows it.
    async fn recover(
        &self,
        key: &str,
        err: CacheError,
        stale: Option<StaleEntry>,
        options: &CacheEntryOptions,
    ) -> CacheResult<FactoryOutcome<Value>> {
        let Some(StaleEntry { entry, tier }) = stale else {
            return Err(err);
        };

        if err.is_soft_timeout() {
            return Ok(self.hit(key, entry, tier, true));
        }

        if err.is_factory_error() {
            warn!(key = %key, error = %err, "factory failed, serving graced value");
            let backoff = options.grace_backoff();
            let entry = if backoff.is_zero() {
                entry
            } else {
                let entry = entry.apply_backoff(backoff);
                if let Err(e) = self.stack.write_entry(key, &entry, options).await {
                    warn!(key = %key, error = %e, "failed to store grace backoff");
                }
                entry
            };
            return Ok(self.hit(key, entry, tier, true));
        }

        Err(err)
    }
}
