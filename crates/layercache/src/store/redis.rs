//! Redis-backed remote store using a deadpool connection pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;

use super::{RemoteStore, StoreError};
use crate::config::RedisConfig;

/// Remote store talking to Redis through a pooled connection.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Wrap an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration. Does not touch the network.
    pub fn from_config(config: &RedisConfig) -> Result<Self, StoreError> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Pool(format!("failed to create Redis pool: {e}")))?;

        Ok(Self { pool })
    }

    /// Check that a connection can be obtained (for health checks).
    pub async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }

    /// Close the pool; later calls fail with [`StoreError::Pool`].
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let result = if ttl.is_zero() {
            conn.set::<_, _, ()>(key, value).await
        } else {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            conn.pset_ex::<_, _, ()>(key, value, millis).await
        };
        result.map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        conn.del::<_, u64>(keys.to_vec())
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
