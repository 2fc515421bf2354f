//! Named remote store clients.
//!
//! A registry owns the Redis pools of a process. Clients are keyed by a
//! stable hash of (name, configuration), so asking twice for the same name
//! and settings returns the same pool while a changed configuration gets a
//! new one. The registry is an ordinary value: create one at startup, share
//! it by reference or `Arc`, and call [`StoreRegistry::shutdown`] on exit.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};
use crate::keys::gen_key;
use crate::store::RedisStore;
use crate::tier::TierKind;

const REGISTRY_PREFIX: &str = "registry:";

#[derive(Default)]
pub struct StoreRegistry {
    stores: DashMap<String, Arc<RedisStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client registered for `(name, config)`, creating and
    /// probing a new pool on first use.
    pub async fn connect(&self, name: &str, config: &RedisConfig) -> CacheResult<Arc<RedisStore>> {
        let id = Self::client_id(name, config);
        if let Some(existing) = self.stores.get(&id) {
            return Ok(existing.clone());
        }

        let store = RedisStore::from_config(config)?;
        if !store.is_available().await {
            store.close();
            return Err(CacheError::tier(
                TierKind::Remote,
                "connect",
                format!("Redis at {} is unreachable", config.url),
            ));
        }
        tracing::info!(name = %name, url = %config.url, pool_size = config.pool_size, "Redis store connected");

        // A concurrent connect for the same id may have won the race.
        let store = self
            .stores
            .entry(id)
            .or_insert_with(|| Arc::new(store))
            .clone();
        Ok(store)
    }

    /// Look up an already connected client.
    pub fn get(&self, name: &str, config: &RedisConfig) -> Option<Arc<RedisStore>> {
        self.stores
            .get(&Self::client_id(name, config))
            .map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Close every pool and forget the clients.
    pub fn shutdown(&self) {
        for entry in self.stores.iter() {
            entry.value().close();
        }
        let closed = self.stores.len();
        self.stores.clear();
        tracing::info!(closed, "store registry shut down");
    }

    fn client_id(name: &str, config: &RedisConfig) -> String {
        gen_key(REGISTRY_PREFIX, &(name, config))
    }
}
