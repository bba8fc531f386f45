//! Remote-only get-or-set.

use serde_json::Value;

use super::{GetSetHandler, StaleEntry};
use crate::error::CacheResult;
use crate::events::Tier;
use crate::factory::{BoxFactory, FactoryContext, FactoryOutcome};
use crate::options::CacheEntryOptions;

impl GetSetHandler {
    pub(super) async fn handle_single_tier(
        &self,
        key: &str,
        factory: BoxFactory,
        options: &CacheEntryOptions,
    ) -> CacheResult<FactoryOutcome<Value>> {
        let full_key = self.stack.full_key(key);
        let grace = options.is_grace_enabled();
        let remote = self.stack.remote();
        let mut stale = None;

        if let (Some(remote), false) = (remote, options.force_fresh()) {
            if let Some(entry) = remote.get(&full_key, options).await? {
                match self.inspect(key, entry, options).await? {
                    Some(c) if c.fresh => return Ok(self.hit(key, c.entry, Tier::Remote, false)),
                    Some(c) => stale = Some(c.entry),
                    None => {}
                }
            }
        }

        let lock_timeout = options.applicable_lock_timeout(grace && stale.is_some());
        let mut guard = match self.locks.acquire(&full_key, lock_timeout).await {
            Ok(guard) => guard,
            Err(err) => {
                if let (true, Some(entry)) = (grace, stale) {
                    return Ok(self.hit(key, entry, Tier::Remote, true));
                }
                return Err(err);
            }
        };

        if let (Some(remote), false) = (remote, options.force_fresh()) {
            stale = None;
            if let Some(entry) = remote.get(&full_key, options).await? {
                match self.inspect(key, entry, options).await? {
                    Some(c) if c.fresh => {
                        guard.release();
                        return Ok(self.hit(key, c.entry, Tier::Remote, false));
                    }
                    Some(c) => stale = Some(c.entry),
                    None => {}
                }
            }
        }

        let stale = stale.filter(|_| grace).map(|entry| StaleEntry {
            entry,
            tier: Tier::Remote,
        });

        self.miss(key);
        let context = FactoryContext::new(key, stale.as_ref().map(|s| s.entry.value().clone()));
        match self.runner.run(key, factory, context, options, guard).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.recover(key, err, stale, options).await,
        }
    }
}
