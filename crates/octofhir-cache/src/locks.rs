//! Per-key lock registry for stampede protection.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{CacheError, CacheResult};

/// Lazily created per-key mutexes.
///
/// Mutual exclusion holds across all tasks of one process; there is no
/// cross-process guarantee.
#[derive(Debug, Default)]
pub struct Locks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Locks {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(mutex) = self.locks.get(key) {
            return Arc::clone(&mutex);
        }
        Arc::clone(
            &self
                .locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Acquire the lock for `key`.
    ///
    /// `None` waits indefinitely, `Some(Duration::ZERO)` only tries once.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::LockTimeout` when the wait budget elapses.
    pub async fn acquire(&self, key: &str, timeout: Option<Duration>) -> CacheResult<LockGuard> {
        let mutex = self.mutex(key);

        let guard = match timeout {
            None => mutex.lock_owned().await,
            Some(timeout) if timeout.is_zero() => mutex
                .try_lock_owned()
                .map_err(|_| CacheError::lock_timeout(key, timeout))?,
            Some(timeout) => tokio::time::timeout(timeout, mutex.lock_owned())
                .await
                .map_err(|_| CacheError::lock_timeout(key, timeout))?,
        };

        Ok(LockGuard {
            key: key.to_string(),
            guard: Some(guard),
        })
    }

    /// Number of keys with a mutex.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop mutexes that nobody holds or waits on.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // The registry holds one reference; any other is a holder or waiter.
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.locks.len())
    }
}

/// Releaser for an acquired key lock.
///
/// Releasing is idempotent and also happens on drop, so every exit path of a
/// factory task gives the lock back.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    /// Returns `true` if this call released the lock.
    pub fn release(&mut self) -> bool {
        self.guard.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let locks = Locks::new();
        let mut guard = locks.acquire("k", None).await.unwrap();
        assert!(guard.is_held());

        let err = locks.acquire("k", Some(Duration::ZERO)).await.unwrap_err();
        assert!(err.is_lock_timeout());

        let err = locks
            .acquire("k", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(err.is_lock_timeout());

        assert!(guard.release());
        assert!(!guard.release());
        assert!(locks.acquire("k", Some(Duration::ZERO)).await.is_ok());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let locks = Locks::new();
        let _a = locks.acquire("a", None).await.unwrap();
        assert!(locks.acquire("b", Some(Duration::ZERO)).await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let locks = Locks::new();
        {
            let _guard = locks.acquire("k", None).await.unwrap();
        }
        assert!(locks.acquire("k", Some(Duration::ZERO)).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let locks = Arc::new(Locks::new());
        let mut guard = locks.acquire("k", None).await.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire("k", Some(Duration::from_secs(1))).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        guard.release();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_prune_idle_keeps_held_locks() {
        let locks = Locks::new();
        let _held = locks.acquire("held", None).await.unwrap();
        drop(locks.acquire("idle", None).await.unwrap());

        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.len(), 1);
    }
}
