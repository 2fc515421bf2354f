//! In-process remote store for single-node development and tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{RemoteStore, StoreError};

/// A stored value with TTL support.
#[derive(Clone, Debug)]
struct StoredEntry {
    value: String,
    stored_at: Instant,
    ttl: Duration,
}

impl StoredEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    /// Zero TTL never expires.
    fn is_expired(&self) -> bool {
        !self.ttl.is_zero() && self.stored_at.elapsed() > self.ttl
    }
}

/// [`RemoteStore`] backed by a `DashMap`, with the same get/set/delete and
/// expiry semantics as Redis.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Drop every key.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), StoredEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if !entry.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
