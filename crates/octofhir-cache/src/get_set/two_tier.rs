//! Local + remote get-or-set.

use serde_json::Value;

use super::{GetSetHandler, StaleEntry};
use crate::error::CacheResult;
use crate::events::Tier;
use crate::factory::{BoxFactory, FactoryContext, FactoryOutcome};
use crate::options::CacheEntryOptions;
use crate::tiers::LocalCache;

impl GetSetHandler {
    pub(super) async fn handle_two_tier(
        &self,
        local: &LocalCache,
        key: &str,
        factory: BoxFactory,
        options: &CacheEntryOptions,
    ) -> CacheResult<FactoryOutcome<Value>> {
        let full_key = self.stack.full_key(key);
        let grace = options.is_grace_enabled();
        let mut local_stale = None;

        if !options.force_fresh() {
            if let Some(entry) = local.get(&full_key).await? {
                match self.inspect(key, entry, options).await? {
                    Some(c) if c.fresh => return Ok(self.hit(key, c.entry, Tier::Local, false)),
                    Some(c) => local_stale = Some(c.entry),
                    None => {}
                }
            }
        }

        let lock_timeout = options.applicable_lock_timeout(grace && local_stale.is_some());
        let mut guard = match self.locks.acquire(&full_key, lock_timeout).await {
            Ok(guard) => guard,
            Err(err) => {
                if let (true, Some(entry)) = (grace, local_stale) {
                    return Ok(self.hit(key, entry, Tier::Local, true));
                }
                if let Some(remote) = self.stack.remote() {
                    if let Some(entry) = remote.get(&full_key, options).await? {
                        match self.inspect(key, entry, options).await? {
                            Some(c) if c.fresh => {
                                return Ok(self.hit(key, c.entry, Tier::Remote, false));
                            }
                            Some(c) if grace => {
                                return Ok(self.hit(key, c.entry, Tier::Remote, true));
                            }
                            _ => {}
                        }
                    }
                }
                return Err(err);
            }
        };

        // Another waiter may have populated, or removed, either tier while we
        // waited.
        let mut remote_stale = None;
        if !options.force_fresh() {
            local_stale = None;
            if let Some(entry) = local.get(&full_key).await? {
                match self.inspect(key, entry, options).await? {
                    Some(c) if c.fresh => {
                        guard.release();
                        return Ok(self.hit(key, c.entry, Tier::Local, false));
                    }
                    Some(c) => local_stale = Some(c.entry),
                    None => {}
                }
            }

            if let Some(remote) = self.stack.remote() {
                if let Some(entry) = remote.get(&full_key, options).await? {
                    match self.inspect(key, entry, options).await? {
                        Some(c) if c.fresh => {
                            self.backfill(&full_key, &c.entry, options).await;
                            guard.release();
                            return Ok(self.hit(key, c.entry, Tier::Remote, false));
                        }
                        Some(c) => remote_stale = Some(c.entry),
                        None => {}
                    }
                }
            }
        }

        let stale = if grace {
            remote_stale
                .map(|entry| StaleEntry {
                    entry,
                    tier: Tier::Remote,
                })
                .or(local_stale.map(|entry| StaleEntry {
                    entry,
                    tier: Tier::Local,
                }))
        } else {
            None
        };

        self.miss(key);
        let context = FactoryContext::new(key, stale.as_ref().map(|s| s.entry.value().clone()));
        match self.runner.run(key, factory, context, options, guard).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.recover(key, err, stale, options).await,
        }
    }
}
