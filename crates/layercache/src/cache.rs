//! The cache orchestrator.
//!
//! [`Cache`] walks its tiers in a fixed order (local, then remote), falls
//! back to the caller's loader on a full miss and writes the loaded value
//! through every tier. Remote calls go through the [`Executor`] for retry and
//! optional single-flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backfill::{BackfillStats, BackfillWorker};
use crate::config::CacheSettings;
use crate::error::{CacheError, CacheResult};
use crate::executor::{Executor, RetryPolicy};
use crate::keys::key_part;
use crate::metrics;
use crate::outcome::Outcome;
use crate::store::RemoteStore;
use crate::tier::{LocalTier, RemoteTier, Tier, TierKind};

/// Bounds every cached value type must satisfy.
pub trait CacheValue: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

type IsZeroFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type IdentifyFn<T> = Arc<dyn Fn(&T) -> CacheResult<Value> + Send + Sync>;

const DEFAULT_BACKFILL_QUEUE: usize = 1024;

/// Point-in-time counters for one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Values held by the local tier
    pub local_entries: usize,
    /// Alias entries held by the local tier
    pub local_index_entries: usize,
    /// Local values evicted for capacity
    pub local_evictions: u64,
    pub backfill: BackfillStats,
}

/// Multi-tier cache for values of type `T`.
///
/// Cloning is cheap; clones share tiers, executor and backfill worker.
pub struct Cache<T: CacheValue> {
    inner: Arc<Inner<T>>,
}

impl<T: CacheValue> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T: CacheValue> {
    prefix: String,
    local: Option<Arc<LocalTier<T>>>,
    remote: Option<Arc<RemoteTier<T>>>,
    tiers: Vec<Arc<dyn Tier<T>>>,
    executor: Executor<T>,
    singleflight: bool,
    is_zero: IsZeroFn<T>,
    identify: IdentifyFn<T>,
    backfill: Option<BackfillWorker<T>>,
}

impl<T: CacheValue> Cache<T> {
    pub fn builder() -> CacheBuilder<T> {
        CacheBuilder::new()
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    pub fn local_tier(&self) -> Option<&Arc<LocalTier<T>>> {
        self.inner.local.as_ref()
    }

    pub fn remote_tier(&self) -> Option<&Arc<RemoteTier<T>>> {
        self.inner.remote.as_ref()
    }

    /// Whether `value` counts as absent.
    pub fn is_zero(&self, value: &T) -> bool {
        (self.inner.is_zero)(value)
    }

    /// Read `key` through the tiers, running `loader` on a full miss.
    ///
    /// A tier error is returned immediately without consulting the loader.
    /// A loader error or zero value is returned as-is and nothing is stored.
    /// Otherwise the loaded value is written into every tier; the first write
    /// error aborts the rest and is returned.
    pub async fn get_or_set<K, F, Fut>(&self, name: &str, key: &K, loader: F) -> Outcome<T>
    where
        K: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let key = match key_part(key) {
            Ok(key) => key,
            Err(e) => return Outcome::failure(e),
        };

        let found = self.lookup(name, &key).await;
        if !found.is_ok() || !self.is_zero(found.data()) {
            return found;
        }
        metrics::record_miss();
        tracing::debug!(name = %name, "cache miss, loading");

        let key = &key;
        let load = move || async move {
            let loaded = match loader().await {
                Ok(value) => value,
                Err(e) => {
                    metrics::record_load("error");
                    tracing::warn!(name = %name, error = %e, "cache loader failed");
                    return Outcome::failure(e);
                }
            };
            if self.is_zero(&loaded) {
                metrics::record_load("zero");
                return Outcome::success(loaded);
            }
            metrics::record_load("stored");
            self.write_through(name, key, loaded).await
        };

        if self.inner.executor.is_enabled() && self.inner.singleflight {
            let fingerprint = self.fingerprint(&[key.clone(), Value::from(name), Value::from("load")]);
            self.inner.executor.coalesce(&fingerprint, load).await
        } else {
            self.inner.executor.once(load).await
        }
    }

    /// Read `key` through the tiers without loading. A miss is the zero value.
    pub async fn get<K>(&self, name: &str, key: &K) -> Outcome<T>
    where
        K: Serialize + ?Sized,
    {
        match key_part(key) {
            Ok(key) => {
                let found = self.lookup(name, &key).await;
                if found.is_ok() && self.is_zero(found.data()) {
                    metrics::record_miss();
                }
                found
            }
            Err(e) => Outcome::failure(e),
        }
    }

    /// Write `value` into every tier under `key`, aliased by its identity.
    ///
    /// A zero value is not stored and is returned unchanged.
    pub async fn set<K>(&self, name: &str, key: &K, value: T) -> Outcome<T>
    where
        K: Serialize + ?Sized,
    {
        let key = match key_part(key) {
            Ok(key) => key,
            Err(e) => return Outcome::failure(e),
        };
        if self.is_zero(&value) {
            return Outcome::success(value);
        }
        self.write_through(name, &key, value).await
    }

    /// Remove the record `key` resolves to, with every alias, from every tier.
    ///
    /// A tier failure is logged and the remaining tiers are still cleaned.
    /// The returned outcome carries the last non-zero removed value and, if
    /// any tier failed, the last such error.
    ///
    /// Backfills queued before the call are applied first so they cannot
    /// restore the record afterwards. A read racing with the delete can still
    /// repopulate the local tier until its TTL.
    pub async fn del<K>(&self, key: &K) -> Outcome<T>
    where
        K: Serialize + ?Sized,
    {
        let key = match key_part(key) {
            Ok(key) => key,
            Err(e) => return Outcome::failure(e),
        };
        self.flush_backfill().await;

        let mut removed = T::default();
        let mut last_error = None;

        for tier in self.configured() {
            let outcome = if tier.supports_retry() {
                let fingerprint = tier.gen_key(&self.inner.prefix, &[key.clone(), Value::from("delete")]);
                self.inner
                    .executor
                    .execute(&fingerprint, self.inner.singleflight, || {
                        tier.delete(&key, &self.inner.prefix)
                    })
                    .await
            } else {
                tier.delete(&key, &self.inner.prefix).await
            };

            match outcome.into_result() {
                Ok(value) => {
                    if !self.is_zero(&value) {
                        removed = value;
                    }
                }
                Err(e) => {
                    metrics::record_delete_error(tier.kind());
                    tracing::warn!(tier = %tier.kind(), error = %e, "cache delete failed, continuing");
                    last_error = Some(e);
                }
            }
        }

        let mut outcome = Outcome::success(removed);
        outcome.set_err(last_error);
        outcome
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        if let Some(local) = &self.inner.local {
            stats.local_entries = local.len();
            stats.local_index_entries = local.index_len();
            stats.local_evictions = local.evictions();
            metrics::set_local_entries(stats.local_entries);
        }
        if let Some(worker) = &self.inner.backfill {
            stats.backfill = worker.stats();
        }
        stats
    }

    /// Wait until every backfill queued so far has been applied.
    pub async fn flush_backfill(&self) {
        if let Some(worker) = &self.inner.backfill {
            worker.flush().await;
        }
    }

    /// Drain and stop the backfill worker. Later backfills are dropped.
    pub async fn shutdown(&self) {
        if let Some(worker) = &self.inner.backfill {
            worker.shutdown().await;
        }
    }

    fn configured(&self) -> impl Iterator<Item = &Arc<dyn Tier<T>>> {
        self.inner.tiers.iter().filter(|tier| tier.is_configured())
    }

    fn fingerprint(&self, parts: &[Value]) -> String {
        crate::keys::gen_key(&self.inner.prefix, parts)
    }

    async fn lookup(&self, name: &str, key: &Value) -> Outcome<T> {
        let mut local_missed = false;

        for tier in self.configured() {
            let outcome = if tier.supports_retry() {
                let fingerprint = tier.gen_key(
                    &self.inner.prefix,
                    &[key.clone(), Value::from(name), Value::from("getorset")],
                );
                self.inner
                    .executor
                    .execute(&fingerprint, self.inner.singleflight, || {
                        tier.get(key, &self.inner.prefix)
                    })
                    .await
            } else {
                tier.get(key, &self.inner.prefix).await
            };

            if let Some(err) = outcome.err() {
                tracing::warn!(tier = %tier.kind(), name = %name, error = %err, "cache read failed");
                return outcome;
            }

            if self.is_zero(outcome.data()) {
                if tier.kind() == TierKind::Local {
                    local_missed = true;
                }
                continue;
            }

            metrics::record_hit(tier.kind());
            tracing::debug!(tier = %tier.kind(), name = %name, "cache hit");

            if tier.kind() == TierKind::Remote && local_missed {
                self.schedule_backfill(name, key, outcome.data());
            }
            return outcome;
        }

        Outcome::miss()
    }

    fn schedule_backfill(&self, name: &str, key: &Value, value: &T) {
        let Some(worker) = &self.inner.backfill else {
            return;
        };
        match (self.inner.identify)(value) {
            Ok(id) => {
                worker.enqueue(key.clone(), name, id, value.clone());
            }
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "cannot backfill value without identity");
            }
        }
    }

    async fn write_through(&self, name: &str, key: &Value, value: T) -> Outcome<T> {
        let id = match (self.inner.identify)(&value) {
            Ok(id) => id,
            Err(e) => return Outcome::failure(e),
        };

        for tier in self.configured() {
            let outcome = if tier.supports_retry() {
                let fingerprint = tier.gen_key(
                    &self.inner.prefix,
                    &[key.clone(), Value::from(name), Value::from("set")],
                );
                self.inner
                    .executor
                    .execute(&fingerprint, false, || {
                        tier.set(key, name, &self.inner.prefix, &id, value.clone())
                    })
                    .await
            } else {
                tier.set(key, name, &self.inner.prefix, &id, value.clone()).await
            };

            if let Some(err) = outcome.err() {
                tracing::warn!(tier = %tier.kind(), name = %name, error = %err, "cache write failed");
                return outcome;
            }
        }

        Outcome::success(value)
    }
}

struct RemoteParts {
    store: Arc<dyn RemoteStore>,
    ttl: Duration,
    op_timeout: Duration,
}

/// Builder for [`Cache`].
///
/// `is_zero` and `identify` are required; [`CacheBuilder::build`] fails
/// without them. Retry is enabled and single-flight disabled by default.
pub struct CacheBuilder<T: CacheValue> {
    prefix: String,
    local: Option<(usize, Duration)>,
    remote: Option<RemoteParts>,
    retry_enabled: bool,
    singleflight: bool,
    policy: RetryPolicy,
    is_zero: Option<IsZeroFn<T>>,
    identify: Option<IdentifyFn<T>>,
    backfill_queue: usize,
}

impl<T: CacheValue> Default for CacheBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheValue> CacheBuilder<T> {
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
            local: None,
            remote: None,
            retry_enabled: true,
            singleflight: false,
            policy: RetryPolicy::default(),
            is_zero: None,
            identify: None,
            backfill_queue: DEFAULT_BACKFILL_QUEUE,
        }
    }

    /// Apply file/env settings. The remote tier is attached only when
    /// `settings.redis.enabled` is set and a store is supplied.
    pub fn from_settings(settings: &CacheSettings, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let mut builder = Self::new()
            .prefix(settings.prefix.clone())
            .retry(
                settings.retry.enabled,
                settings.retry.singleflight,
                settings.retry.policy(),
            )
            .backfill_queue(settings.backfill.queue_capacity);

        if settings.local.enabled {
            builder = builder.local(settings.local.capacity, settings.local.ttl());
        }
        if let Some(store) = remote.filter(|_| settings.redis.enabled) {
            builder = builder
                .remote(store, settings.redis.ttl())
                .remote_op_timeout(settings.redis.operation_timeout());
        }
        builder
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Enable the in-process tier with `capacity` records living `ttl` each.
    pub fn local(mut self, capacity: usize, ttl: Duration) -> Self {
        self.local = Some((capacity, ttl));
        self
    }

    /// Enable the remote tier over `store`, writing entries with `ttl`.
    pub fn remote(mut self, store: Arc<dyn RemoteStore>, ttl: Duration) -> Self {
        self.remote = Some(RemoteParts {
            store,
            ttl,
            op_timeout: Duration::ZERO,
        });
        self
    }

    /// Bound each remote round trip. Zero disables the bound.
    pub fn remote_op_timeout(mut self, timeout: Duration) -> Self {
        if let Some(remote) = self.remote.as_mut() {
            remote.op_timeout = timeout;
        }
        self
    }

    pub fn retry(mut self, enabled: bool, singleflight: bool, policy: RetryPolicy) -> Self {
        self.retry_enabled = enabled;
        self.singleflight = singleflight;
        self.policy = policy;
        self
    }

    /// Predicate deciding when a value counts as absent.
    pub fn is_zero<F>(mut self, is_zero: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.is_zero = Some(Arc::new(is_zero));
        self
    }

    /// Extract a record's identity, used for the canonical key and id alias.
    pub fn identify<F, I>(mut self, identify: F) -> Self
    where
        F: Fn(&T) -> I + Send + Sync + 'static,
        I: Serialize,
    {
        self.identify = Some(Arc::new(move |value: &T| key_part(&identify(value))));
        self
    }

    pub fn backfill_queue(mut self, capacity: usize) -> Self {
        self.backfill_queue = capacity;
        self
    }

    /// Assemble the cache.
    ///
    /// The backfill worker runs only when both tiers are enabled; in that
    /// case this must be called inside a Tokio runtime.
    pub fn build(self) -> CacheResult<Cache<T>> {
        let is_zero = self
            .is_zero
            .ok_or_else(|| CacheError::Config("is_zero callback is required".into()))?;
        let identify = self
            .identify
            .ok_or_else(|| CacheError::Config("identify callback is required".into()))?;

        let local = self
            .local
            .map(|(capacity, ttl)| Arc::new(LocalTier::new(capacity, ttl)));
        let remote = self.remote.map(|parts| {
            Arc::new(RemoteTier::new(parts.store, parts.ttl).with_op_timeout(parts.op_timeout))
        });

        let mut tiers: Vec<Arc<dyn Tier<T>>> = Vec::with_capacity(2);
        if let Some(local) = &local {
            tiers.push(local.clone());
        }
        if let Some(remote) = &remote {
            tiers.push(remote.clone());
        }

        let backfill = match (&local, &remote) {
            (Some(local), Some(_)) => Some(BackfillWorker::<T>::spawn(
                local.clone(),
                self.prefix.clone(),
                self.backfill_queue,
            )?),
            _ => None,
        };

        tracing::debug!(
            prefix = %self.prefix,
            local = local.is_some(),
            remote = remote.is_some(),
            retry = self.retry_enabled,
            singleflight = self.singleflight,
            "cache built"
        );

        Ok(Cache {
            inner: Arc::new(Inner {
                prefix: self.prefix,
                local,
                remote,
                tiers,
                executor: Executor::new(self.retry_enabled, self.policy),
                singleflight: self.singleflight,
                is_zero,
                identify,
                backfill,
            }),
        })
    }
}
