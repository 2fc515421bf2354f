//! Capacity-bounded LRU map with a uniform TTL.
//!
//! Backs the local tier. Every read promotes the entry; inserting into a full
//! map evicts the least-recently-used entry. Expired entries are dropped
//! lazily when touched.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Cached entry with expiration time.
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Thread-safe LRU map keyed by `K` (cache keys are `String`).
pub struct BoundedMap<V, K = String> {
    inner: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
    evictions: AtomicU64,
}

impl<V: Clone, K: Hash + Eq> BoundedMap<V, K> {
    /// Create a map holding at most `capacity` entries (minimum 1). A zero
    /// `ttl` disables expiry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            evictions: AtomicU64::new(0),
        }
    }

    /// Get a value, promoting it to most-recently-used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_with(key, V::clone)
    }

    /// Promote a live entry and project it through `f` under the lock.
    pub fn get_with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired = match inner.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(f(&entry.value)),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.pop(key);
        }
        None
    }

    /// Check presence without promoting.
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Insert or replace a value, evicting the LRU entry when full.
    pub fn insert(&self, key: K, value: V) {
        let expires_at = (!self.ttl.is_zero()).then(|| Instant::now() + self.ttl);
        let mut inner = self.inner.lock();
        let replaces = inner.contains(&key);
        if inner.push(key, Entry { value, expires_at }).is_some() && !replaces {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a value, returning it if it was live.
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.inner
            .lock()
            .pop(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value)
    }

    /// Number of stored entries (expired entries not yet touched included).
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    /// Entries evicted to make room since creation.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
