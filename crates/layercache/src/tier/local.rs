//! In-process tier: two bounded LRU maps.
//!
//! - `index`: alias → canonical key
//! - `values`: canonical key → value plus its alias set
//!
//! A value and its alias set share one slot, so they are evicted together.
//! The index is sized to a multiple of the record capacity and an alias can
//! outlive its value. Such an alias resolves to a miss, and a write through
//! it repoints it at the new record's canonical key.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Tier, TierKind};
use crate::outcome::Outcome;
use crate::store::BoundedMap;

/// Index entries kept per value slot.
const INDEX_FANOUT: usize = 4;

#[derive(Clone)]
struct Slot<T> {
    value: T,
    aliases: Vec<String>,
}

pub struct LocalTier<T> {
    index: BoundedMap<String>,
    values: BoundedMap<Slot<T>>,
    capacity: usize,
    ttl: Duration,
}

impl<T: Clone> LocalTier<T> {
    /// Create a local tier holding up to `capacity` records for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            index: BoundedMap::new(capacity.saturating_mul(INDEX_FANOUT), ttl),
            values: BoundedMap::new(capacity, ttl),
            capacity,
            ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of alias entries.
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Values evicted to make room.
    pub fn evictions(&self) -> u64 {
        self.values.evictions()
    }

    /// Whether `key` currently has an alias entry. Does not promote.
    pub fn contains(&self, key: &Value, prefix: &str) -> bool {
        let key_key = crate::keys::gen_key(prefix, &[key]);
        !key_key.is_empty() && self.index.contains(&key_key)
    }

    /// Whether a value is stored under the canonical key. Does not promote.
    pub fn contains_canonical(&self, canonical: &str) -> bool {
        self.values.contains(&canonical.to_string())
    }

    pub fn clear(&self) {
        self.index.clear();
        self.values.clear();
    }

    /// Canonical key `alias` points at, if a value is still stored there.
    fn live_target(&self, alias: &String) -> Option<String> {
        self.index
            .get(alias)
            .filter(|canonical| self.values.contains(canonical))
    }

    fn lookup(&self, key: &Value, prefix: &str) -> Option<T> {
        let key_key = crate::keys::gen_key(prefix, &[key]);
        if key_key.is_empty() {
            return None;
        }
        let canonical = self.index.get(&key_key)?;
        self.values.get_with(&canonical, |slot| slot.value.clone())
    }

    fn store(&self, key: &Value, name: &str, prefix: &str, id: &Value, value: &T) {
        let key_key = crate::keys::gen_key(prefix, &[key]);
        let id_key = crate::keys::gen_key(prefix, &[id]);
        let fresh = crate::keys::gen_key(prefix, &[&Value::from(name), id]);
        if key_key.is_empty() || id_key.is_empty() || fresh.is_empty() {
            tracing::warn!(tier = "local", "skipping store with unusable key");
            return;
        }

        let canonical = self.live_target(&key_key).unwrap_or(fresh);
        self.index.insert(key_key.clone(), canonical.clone());

        let id_target = match self.live_target(&id_key) {
            Some(target) => target,
            None => {
                self.index.insert(id_key.clone(), canonical.clone());
                canonical.clone()
            }
        };

        let mut aliases = self
            .values
            .get_with(&canonical, |slot| slot.aliases.clone())
            .unwrap_or_default();
        if !aliases.contains(&key_key) {
            aliases.push(key_key);
        }
        // an id alias owned by another record stays with that record
        if id_target == canonical && !aliases.contains(&id_key) {
            aliases.push(id_key);
        }

        self.values.insert(
            canonical,
            Slot {
                value: value.clone(),
                aliases,
            },
        );
    }

    fn remove(&self, key: &Value, prefix: &str) -> Option<T> {
        let key_key = crate::keys::gen_key(prefix, &[key]);
        if key_key.is_empty() {
            return None;
        }

        let canonical = self.index.remove(&key_key)?;
        let slot = self.values.remove(&canonical)?;
        for alias in &slot.aliases {
            let points_here = self
                .index
                .get_with(alias, |target| target == &canonical)
                .unwrap_or(false);
            if points_here {
                self.index.remove(alias);
            }
        }

        Some(slot.value)
    }
}

#[async_trait]
impl<T> Tier<T> for LocalTier<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn kind(&self) -> TierKind {
        TierKind::Local
    }

    fn supports_retry(&self) -> bool {
        false
    }

    async fn get(&self, key: &Value, prefix: &str) -> Outcome<T> {
        match self.lookup(key, prefix) {
            Some(value) => {
                tracing::debug!(tier = "local", "cache hit");
                Outcome::success(value)
            }
            None => Outcome::miss(),
        }
    }

    async fn set(
        &self,
        key: &Value,
        name: &str,
        prefix: &str,
        id: &Value,
        value: T,
    ) -> Outcome<T> {
        self.store(key, name, prefix, id, &value);
        tracing::debug!(tier = "local", name = %name, "cache set");
        Outcome::success(value)
    }

    async fn delete(&self, key: &Value, prefix: &str) -> Outcome<T> {
        let removed = self.remove(key, prefix);
        tracing::debug!(tier = "local", found = removed.is_some(), "cache delete");
        Outcome::success(removed.unwrap_or_default())
    }
}
