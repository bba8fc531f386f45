//! In-process driver backed by `DashMap`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use crate::KEY_SEPARATOR;
use crate::driver::{CacheDriver, DynDriver};
use crate::error::CacheResult;

#[derive(Debug, Clone)]
struct MemoryRow {
    data: Arc<Vec<u8>>,
    expires_at: Option<Instant>,
    /// Insertion slot in the eviction order; kept across overwrites.
    slot: u64,
}

impl MemoryRow {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn is_same(&self, other: &MemoryRow) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

#[derive(Debug, Default)]
struct MemoryStore {
    rows: DashMap<String, MemoryRow>,
    /// Insertion order for FIFO eviction. Pairs whose row is gone are skipped
    /// on pop and compacted away once they outnumber the live rows.
    order: Mutex<VecDeque<(String, u64)>>,
    next_slot: AtomicU64,
    max_items: Option<usize>,
}

impl MemoryStore {
    fn insert(&self, key: &str, data: Vec<u8>, ttl: Option<Duration>) {
        let data = Arc::new(data);
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);

        let new_slot = match self.rows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get().slot;
                occupied.insert(MemoryRow {
                    data,
                    expires_at,
                    slot,
                });
                None
            }
            Entry::Vacant(vacant) => {
                let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
                vacant.insert(MemoryRow {
                    data,
                    expires_at,
                    slot,
                });
                Some(slot)
            }
        };

        let (Some(slot), Some(max_items)) = (new_slot, self.max_items) else {
            return;
        };

        let mut order = self.order.lock();
        order.push_back((key.to_string(), slot));

        while self.rows.len() > max_items {
            let Some((oldest, oldest_slot)) = order.pop_front() else {
                break;
            };
            self.rows.remove_if(&oldest, |_, row| row.slot == oldest_slot);
        }

        if order.len() > max_items.saturating_mul(2) {
            order.retain(|(key, slot)| self.rows.get(key).is_some_and(|row| row.slot == *slot));
        }
    }

    fn get(&self, key: &str) -> Option<MemoryRow> {
        let now = Instant::now();
        let row = self.rows.get(key)?.clone();
        if row.is_expired(now) {
            self.rows.remove_if(key, |_, r| r.is_same(&row));
            return None;
        }
        Some(row)
    }

    fn remove(&self, key: &str) -> bool {
        self.rows.remove(key).is_some()
    }

    /// Swap the value only if the live row still holds `current`.
    fn replace_if(&self, key: &str, current: &[u8], value: Vec<u8>) -> bool {
        let now = Instant::now();
        let Some(mut row) = self.rows.get_mut(key) else {
            return false;
        };
        if row.is_expired(now) || row.data.as_slice() != current {
            return false;
        }
        row.data = Arc::new(value);
        true
    }
}

/// In-memory driver.
///
/// Rows expire lazily on read and through [`prune`](CacheDriver::prune).
/// With a `max_items` bound the oldest inserted keys are evicted first.
/// Namespace views share the same store.
///
/// # Example
///
/// ```
/// use octofhir_cache::drivers::MemoryDriver;
///
/// let driver = MemoryDriver::new().with_max_items(10_000);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    store: Arc<MemoryStore>,
    prefix: Option<String>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            prefix: None,
        }
    }

    /// Bound the number of rows kept. Must be called before the driver is shared.
    pub fn with_max_items(self, max_items: usize) -> Self {
        Self {
            store: Arc::new(MemoryStore {
                max_items: Some(max_items.max(1)),
                ..MemoryStore::default()
            }),
            prefix: self.prefix,
        }
    }

    pub fn new_shared() -> DynDriver {
        Arc::new(Self::new())
    }

    /// Number of rows in the whole store, expired rows included.
    pub fn len(&self) -> usize {
        self.store.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.rows.is_empty()
    }

    fn scoped(&self, key: &str) -> bool {
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with(KEY_SEPARATOR)),
            None => true,
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheDriver for MemoryDriver {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.store.get(key).map(|row| row.data.as_ref().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        self.store.insert(key, value, ttl);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.remove(key))
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<bool> {
        let mut removed = false;
        for key in keys {
            removed |= self.store.remove(key);
        }
        Ok(removed)
    }

    async fn clear(&self) -> CacheResult<()> {
        match &self.prefix {
            None => {
                self.store.rows.clear();
                self.store.order.lock().clear();
            }
            Some(_) => self.store.rows.retain(|key, _| !self.scoped(key)),
        }
        Ok(())
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.get(key).is_some())
    }

    async fn pull(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .store
            .rows
            .remove(key)
            .filter(|(_, row)| !row.is_expired(now))
            .map(|(_, row)| row.data.as_ref().clone()))
    }

    async fn replace_if(&self, key: &str, current: &[u8], value: Vec<u8>) -> CacheResult<bool> {
        Ok(self.store.replace_if(key, current, value))
    }

    async fn remaining_ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .store
            .get(key)
            .and_then(|row| row.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    fn namespace(&self, name: &str) -> DynDriver {
        let prefix = match &self.prefix {
            Some(parent) => format!("{parent}{KEY_SEPARATOR}{name}"),
            None => name.to_string(),
        };
        Arc::new(Self {
            store: Arc::clone(&self.store),
            prefix: Some(prefix),
        })
    }

    async fn prune(&self) -> CacheResult<()> {
        let now = Instant::now();
        let before = self.store.rows.len();
        self.store
            .rows
            .retain(|key, row| !(self.scoped(key) && row.is_expired(now)));
        tracing::debug!(
            pruned = before.saturating_sub(self.store.rows.len()),
            "pruned memory driver"
        );
        Ok(())
    }
}
