//! Runs factories under the timeout policy and writes their results back.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::{CacheError, CacheResult};
use crate::factory::{BoxFactory, FactoryContext, FactoryOutcome};
use crate::locks::LockGuard;
use crate::options::CacheEntryOptions;
use crate::stack::CacheStack;

type Reply = oneshot::Sender<CacheResult<FactoryOutcome<Value>>>;

/// Executes factories on detached tasks.
///
/// The task owns the lock guard, so the lock is released when the factory
/// finishes even if the caller stopped waiting. Timeouts only detach the
/// caller; the factory is never cancelled.
#[derive(Debug, Clone)]
pub struct FactoryRunner {
    stack: Arc<CacheStack>,
}

impl FactoryRunner {
    pub fn new(stack: Arc<CacheStack>) -> Self {
        Self { stack }
    }

    /// Run `factory` for `key` while holding `guard`.
    ///
    /// # Errors
    ///
    /// - `SoftTimeout` immediately when stale-while-revalidate applies, or when
    ///   the soft budget elapses
    /// - `HardTimeout` when the hard budget elapses
    /// - `Factory` when the factory fails in the foreground
    pub async fn run(
        &self,
        key: &str,
        factory: BoxFactory,
        context: FactoryContext,
        options: &CacheEntryOptions,
        guard: LockGuard,
    ) -> CacheResult<FactoryOutcome<Value>> {
        let has_fallback = context.has_stale_value();

        if options.should_use_stale_while_revalidate(has_fallback) {
            debug!(key = %key, "revalidating in background");
            tokio::spawn(execute(
                Arc::clone(&self.stack),
                key.to_string(),
                factory,
                context,
                options.clone(),
                guard,
                None,
            ));
            return Err(CacheError::soft_timeout(key, Duration::ZERO));
        }

        let (tx, rx) = oneshot::channel();
        tokio::spawn(execute(
            Arc::clone(&self.stack),
            key.to_string(),
            factory,
            context,
            options.clone(),
            guard,
            Some(tx),
        ));

        let received = match options.factory_timeout(has_fallback) {
            Some(timeout) => match tokio::time::timeout(timeout.duration(), rx).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(key = %key, ?timeout, "factory timed out, continuing in background");
                    return Err(timeout.into_error(key));
                }
            },
            None => rx.await,
        };

        received.map_err(|_| {
            CacheError::factory(key, "factory task terminated before completing".into(), false)
        })?
    }
}

async fn execute(
    stack: Arc<CacheStack>,
    key: String,
    factory: BoxFactory,
    context: FactoryContext,
    options: CacheEntryOptions,
    mut guard: LockGuard,
    reply: Option<Reply>,
) {
    // A panicking factory is reported like any other failure.
    let produced = match tokio::spawn(async move { factory(context).await }).await {
        Ok(produced) => produced,
        Err(join) => Err(format!("factory panicked: {join}").into()),
    };

    let outcome = match produced {
        Ok(FactoryOutcome::Value(value)) => {
            let written = stack.set(&key, Some(value.clone()), &options).await;
            guard.release();
            written.map(|_| FactoryOutcome::Value(value))
        }
        Ok(FactoryOutcome::Skip) => {
            guard.release();
            debug!(key = %key, "factory skipped caching");
            Ok(FactoryOutcome::Skip)
        }
        Err(source) => {
            guard.release();
            let is_background = reply.as_ref().is_none_or(|tx| tx.is_closed());
            let err = CacheError::factory(&key, source, is_background);
            if let Some(hook) = options.on_factory_error() {
                hook.call(&err);
            }
            Err(err)
        }
    };

    match reply {
        Some(tx) => {
            if let Err(Err(e)) = tx.send(outcome) {
                error!(key = %key, error = %e, "background factory failed");
            }
        }
        None => {
            if let Err(e) = outcome {
                error!(key = %key, error = %e, "background factory failed");
            }
        }
    }
}
