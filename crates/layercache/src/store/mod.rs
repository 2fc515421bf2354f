//! Storage primitives underneath the cache tiers.
//!
//! - [`RemoteStore`]: the shared key-value boundary (Redis in production,
//!   [`MemoryStore`] for single-node development and tests)
//! - [`BoundedMap`]: the capacity-bounded LRU map behind the local tier

pub mod bounded;
pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use bounded::BoundedMap;
pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Errors reported by a remote store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not obtain a connection
    #[error("connection pool error: {0}")]
    Pool(String),

    /// The store rejected or failed a command
    #[error("command error: {0}")]
    Command(String),

    /// The call did not complete in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Remote key-value store boundary.
///
/// Keys and values are opaque strings. TTL is applied per call but the cache
/// always passes the same TTL for a given instance. A zero TTL means no expiry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get a value; `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a value with the given TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
