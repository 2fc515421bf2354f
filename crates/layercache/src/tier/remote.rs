//! Remote tier: alias triple kept in a shared key-value store.
//!
//! ## Layout
//!
//! ```text
//! key_key   → canonical              (string)
//! id_key    → canonical              (string)
//! keys_key  → ["key_key", "id_key"]  (JSON list, keys_key = hash(prefix, [canonical]))
//! canonical → value                  (JSON)
//! ```
//!
//! ## Write Sequence
//!
//! `set` runs four steps in order: create `key_key` if absent, create `id_key`
//! if absent, read-modify-write the alias list, write the value. The steps
//! are separate round trips. Two writers updating the same alias list can
//! interleave and the slower write wins, dropping the other's alias; an alias
//! lost this way is not removed by a later delete and expires with its TTL.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Tier, TierKind};
use crate::error::{CacheError, CacheResult};
use crate::keys::gen_key;
use crate::outcome::Outcome;
use crate::store::{RemoteStore, StoreError};

pub struct RemoteTier<T> {
    store: Arc<dyn RemoteStore>,
    ttl: Duration,
    op_timeout: Option<Duration>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RemoteTier<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn RemoteStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            op_timeout: None,
            _marker: PhantomData,
        }
    }

    /// Bound every store round trip; a timeout becomes a tier error.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    async fn call<R>(
        &self,
        step: &'static str,
        fut: impl Future<Output = Result<R, StoreError>>,
    ) -> CacheResult<R> {
        let result = match self.op_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(limit)),
            },
            None => fut.await,
        };
        result.map_err(|e| CacheError::tier(TierKind::Remote, step, e))
    }

    /// Read a key, treating an empty string like an absent key.
    async fn read(&self, step: &'static str, key: &str) -> CacheResult<Option<String>> {
        let value = self.call(step, self.store.get(key)).await?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn write(&self, step: &'static str, key: &str, value: &str) -> CacheResult<()> {
        self.call(step, self.store.set(key, value, self.ttl)).await
    }

    async fn read_aliases(&self, keys_key: &str) -> CacheResult<Vec<String>> {
        match self.read("get alias set", keys_key).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(CacheError::from),
            None => Ok(Vec::new()),
        }
    }

    async fn try_get(&self, key: &Value, prefix: &str) -> CacheResult<Option<T>> {
        let key_key = gen_key(prefix, &[key]);
        if key_key.is_empty() {
            return Ok(None);
        }

        let Some(canonical) = self.read("get canonical by key alias", &key_key).await? else {
            return Ok(None);
        };
        let Some(raw) = self.read("get value", &canonical).await? else {
            return Ok(None);
        };

        let value = serde_json::from_str(&raw)?;
        Ok(Some(value))
    }

    async fn try_set(
        &self,
        key: &Value,
        name: &str,
        prefix: &str,
        id: &Value,
        value: &T,
    ) -> CacheResult<()> {
        let payload = serde_json::to_string(value)?;

        let key_key = gen_key(prefix, &[key]);
        let id_key = gen_key(prefix, &[id]);
        if key_key.is_empty() || id_key.is_empty() {
            tracing::warn!(tier = "remote", "skipping store with unusable key");
            return Ok(());
        }

        // 1. request alias
        let canonical = match self.read("get canonical by key alias", &key_key).await? {
            Some(canonical) => canonical,
            None => {
                let canonical = gen_key(prefix, &[Value::from(name), id.clone()]);
                self.write("set key alias", &key_key, &canonical).await?;
                canonical
            }
        };

        // 2. id alias
        if self
            .read("get canonical by id alias", &id_key)
            .await?
            .is_none()
        {
            self.write("set id alias", &id_key, &canonical).await?;
        }

        // 3. alias set
        let keys_key = gen_key(prefix, &[&canonical]);
        let mut aliases = self.read_aliases(&keys_key).await?;
        let before = aliases.len();
        for alias in [key_key, id_key] {
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        if aliases.len() != before {
            let encoded = serde_json::to_string(&aliases)?;
            self.write("set alias set", &keys_key, &encoded).await?;
        }

        // 4. value
        self.write("set value", &canonical, &payload).await
    }

    async fn try_delete(&self, key: &Value, prefix: &str) -> CacheResult<Option<T>> {
        let key_key = gen_key(prefix, &[key]);
        if key_key.is_empty() {
            return Ok(None);
        }

        let Some(canonical) = self.read("get canonical by key alias", &key_key).await? else {
            return Ok(None);
        };

        // an undecodable value or alias list must not block its own removal
        let existing = match self.read("get value", &canonical).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(tier = "remote", error = %e, "deleting undecodable value");
                    None
                }
            },
            None => None,
        };

        let keys_key = gen_key(prefix, &[&canonical]);
        let mut doomed = match self.read_aliases(&keys_key).await {
            Err(CacheError::Serialization(e)) => {
                tracing::warn!(tier = "remote", error = %e, "deleting undecodable alias set");
                Vec::new()
            }
            other => other?,
        };
        if !doomed.contains(&key_key) {
            doomed.push(key_key);
        }
        doomed.push(canonical);
        doomed.push(keys_key);

        let removed = self.call("delete keys", self.store.delete(&doomed)).await?;
        tracing::debug!(tier = "remote", removed, "cache delete");

        Ok(existing)
    }
}

#[async_trait]
impl<T> Tier<T> for RemoteTier<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    fn kind(&self) -> TierKind {
        TierKind::Remote
    }

    fn supports_retry(&self) -> bool {
        true
    }

    async fn get(&self, key: &Value, prefix: &str) -> Outcome<T> {
        self.try_get(key, prefix)
            .await
            .map(Option::unwrap_or_default)
            .into()
    }

    async fn set(
        &self,
        key: &Value,
        name: &str,
        prefix: &str,
        id: &Value,
        value: T,
    ) -> Outcome<T> {
        match self.try_set(key, name, prefix, id, &value).await {
            Ok(()) => {
                tracing::debug!(tier = "remote", backend = self.store.backend(), name = %name, "cache set");
                Outcome::success(value)
            }
            Err(e) => Outcome::failure(e),
        }
    }

    async fn delete(&self, key: &Value, prefix: &str) -> Outcome<T> {
        self.try_delete(key, prefix)
            .await
            .map(Option::unwrap_or_default)
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde::Deserialize;
    use serde_json::json;

    const PREFIX: &str = "test:";

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    fn user(id: u64, name: &str) -> User {
        User {
            id,
            name: name.to_string(),
        }
    }

    fn tier() -> (Arc<MemoryStore>, RemoteTier<User>) {
        let store = Arc::new(MemoryStore::new());
        let tier = RemoteTier::new(store.clone(), Duration::from_secs(60));
        (store, tier)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_, tier) = tier();
        let out = tier
            .set(&json!("u1"), "profile", PREFIX, &json!(1), user(1, "a"))
            .await;
        assert!(out.is_ok());
        assert_eq!(tier.get(&json!("u1"), PREFIX).await.data(), &user(1, "a"));
    }

    #[tokio::test]
    async fn test_set_writes_full_triple() {
        let (store, tier) = tier();
        tier.set(&json!("u1"), "profile", PREFIX, &json!(1), user(1, "a"))
            .await;

        let canonical = gen_key(PREFIX, &[json!("profile"), json!(1)]);
        let keys_key = gen_key(PREFIX, &[&canonical]);
        assert!(store.contains_key(&gen_key(PREFIX, &[json!("u1")])));
        assert!(store.contains_key(&gen_key(PREFIX, &[json!(1)])));
        assert!(store.contains_key(&canonical));
        assert!(store.contains_key(&keys_key));
        assert_eq!(store.len(), 4);

        let aliases: Vec<String> =
            serde_json::from_str(&store.get(&keys_key).await.unwrap().unwrap()).unwrap();
        assert_eq!(aliases.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_leaves_nothing_behind() {
        let (store, tier) = tier();
        tier.set(&json!("u1"), "profile", PREFIX, &json!(1), user(1, "a"))
            .await;
        tier.set(&json!("a@example.org"), "profile", PREFIX, &json!(1), user(1, "a"))
            .await;

        let deleted = tier.delete(&json!(1), PREFIX).await;
        assert_eq!(deleted.data(), &user(1, "a"));
        assert!(store.is_empty());

        assert_eq!(tier.get(&json!("u1"), PREFIX).await.data(), &User::default());
        assert_eq!(
            tier.get(&json!("a@example.org"), PREFIX).await.data(),
            &User::default()
        );
    }

    #[tokio::test]
    async fn test_corrupt_value_is_serialization_error() {
        let (store, tier) = tier();
        tier.set(&json!("u1"), "profile", PREFIX, &json!(1), user(1, "a"))
            .await;
        let canonical = gen_key(PREFIX, &[json!("profile"), json!(1)]);
        store
            .set(&canonical, "{not json", Duration::from_secs(60))
            .await
            .unwrap();

        let out = tier.get(&json!("u1"), PREFIX).await;
        assert!(matches!(out.err(), Some(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_undecodable_record() {
        let (store, tier) = tier();
        tier.set(&json!("u1"), "profile", PREFIX, &json!(1), user(1, "a"))
            .await;
        let canonical = gen_key(PREFIX, &[json!("profile"), json!(1)]);
        store
            .set(&canonical, "{corrupt", Duration::from_secs(60))
            .await
            .unwrap();

        let deleted = tier.delete(&json!("u1"), PREFIX).await;
        assert!(deleted.is_ok());
        assert_eq!(deleted.data(), &User::default());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_survives_undecodable_alias_set() {
        let (store, tier) = tier();
        tier.set(&json!("u1"), "profile", PREFIX, &json!(1), user(1, "a"))
            .await;
        let canonical = gen_key(PREFIX, &[json!("profile"), json!(1)]);
        let keys_key = gen_key(PREFIX, &[&canonical]);
        store
            .set(&keys_key, "[oops", Duration::from_secs(60))
            .await
            .unwrap();

        let deleted = tier.delete(&json!("u1"), PREFIX).await;
        assert_eq!(deleted.data(), &user(1, "a"));
        assert!(!store.contains_key(&canonical));
        assert!(!store.contains_key(&keys_key));
        assert!(!store.contains_key(&gen_key(PREFIX, &[json!("u1")])));
        assert_eq!(tier.get(&json!("u1"), PREFIX).await.data(), &User::default());
    }

    struct SlowStore;

    #[async_trait]
    impl RemoteStore for SlowStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
            Ok(0)
        }

        fn backend(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_op_timeout_is_tier_error() {
        let tier: RemoteTier<User> = RemoteTier::new(Arc::new(SlowStore), Duration::from_secs(60))
            .with_op_timeout(Duration::from_millis(20));

        let out = tier.get(&json!("u1"), PREFIX).await;
        let err = out.err().expect("timeout error");
        assert!(matches!(err, CacheError::Tier { tier: TierKind::Remote, .. }));
        assert!(err.to_string().contains("timed out"));
    }
}
