//! Fixed-capacity LRU cache with a removal handler

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::errors::LruError;

/// Called with the evicted key and value while the entry is still indexed
pub type RemovalHandler<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

struct Entry<V> {
    value: V,
    stamp: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Access stamp to key, oldest first
    order: BTreeMap<u64, K>,
    next_stamp: u64,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn touch(&mut self, key: &K) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.stamp);
            entry.stamp = stamp;
            self.order.insert(stamp, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.stamp);
        Some(entry.value)
    }

    fn least_recent(&self) -> Option<K> {
        self.order.values().next().cloned()
    }
}

/// Thread-safe least-recently-used cache
///
/// Every mutation takes the internal lock. The removal handler runs under
/// that lock and must not call back into the cache.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
    on_remove: Option<RemovalHandler<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Create an empty cache holding at most `capacity` entries
    ///
    /// # Errors
    ///
    /// Returns `LruError::InvalidCapacity` for a zero capacity
    pub fn new(capacity: usize) -> Result<Self, LruError> {
        if capacity == 0 {
            return Err(LruError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: BTreeMap::new(),
                next_stamp: 0,
            }),
            on_remove: None,
        })
    }

    /// Set the handler invoked for every evicted entry
    pub fn with_removal_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.on_remove = Some(Box::new(handler));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Value for `key`, promoting it to most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        inner.touch(key);
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert `key` as most recently used
    ///
    /// A full cache evicts its least recently used entry first. Adding an
    /// existing key replaces its value without evicting anything.
    pub fn add(&self, key: K, value: V) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            inner.touch(&key);
            return;
        }

        if inner.entries.len() >= self.capacity {
            if let Some(evicted) = inner.least_recent() {
                if let (Some(handler), Some(entry)) = (&self.on_remove, inner.entries.get(&evicted)) {
                    handler(&evicted, &entry.value);
                }
                inner.remove(&evicted);
                debug!("LRU cache evicted one entry at capacity {}", self.capacity);
            }
        }

        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        inner.order.insert(stamp, key.clone());
        inner.entries.insert(key, Entry { value, stamp });
    }

    /// Remove `key` without invoking the removal handler
    pub fn remove(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Keys from most to least recently used
    pub fn get_keys(&self) -> Vec<K> {
        self.lock().order.values().rev().cloned().collect()
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("has_removal_handler", &self.on_remove.is_some())
            .finish()
    }
}
