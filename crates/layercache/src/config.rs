//! Cache settings.
//!
//! Loaded from an optional TOML file plus environment overrides:
//!
//! ```toml
//! prefix = "user:"
//!
//! [local]
//! capacity = 10000
//! ttl_secs = 300
//!
//! [redis]
//! enabled = true
//! url = "redis://localhost:6379"
//! ```
//!
//! `LAYERCACHE__REDIS__URL=redis://cache:6379` overrides `redis.url`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::executor::RetryPolicy;

/// Default settings file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "layercache.toml";

/// Environment variable prefix, e.g. `LAYERCACHE__LOCAL__CAPACITY=500`.
pub const ENV_PREFIX: &str = "LAYERCACHE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Prepended to every key this cache generates
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
}

impl CacheSettings {
    pub fn validate(&self) -> CacheResult<()> {
        if self.local.enabled && self.local.capacity == 0 {
            return Err(CacheError::Config("local.capacity must be > 0".into()));
        }
        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err(CacheError::Config(
                    "redis.enabled=true requires redis.url".into(),
                ));
            }
            if self.redis.pool_size == 0 {
                return Err(CacheError::Config("redis.pool_size must be > 0".into()));
            }
            if self.redis.timeout_ms == 0 {
                return Err(CacheError::Config("redis.timeout_ms must be > 0".into()));
            }
        }
        if self.backfill.queue_capacity == 0 {
            return Err(CacheError::Config(
                "backfill.queue_capacity must be > 0".into(),
            ));
        }
        if !self.local.enabled && !self.redis.enabled {
            tracing::warn!("no cache tier enabled; every lookup goes to the loader");
        }
        Ok(())
    }
}

/// In-process LRU tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_enabled")]
    pub enabled: bool,

    /// Maximum number of records held in memory
    #[serde(default = "default_local_capacity")]
    pub capacity: usize,

    /// Entry lifetime in seconds (0 = no expiry)
    #[serde(default = "default_local_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_local_enabled() -> bool {
    true
}

fn default_local_capacity() -> usize {
    10_000
}

fn default_local_ttl_secs() -> u64 {
    300
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: default_local_enabled(),
            capacity: default_local_capacity(),
            ttl_secs: default_local_ttl_secs(),
        }
    }
}

impl LocalConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Redis tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Default: false (local tier only)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Entry lifetime in seconds (0 = no expiry)
    #[serde(default = "default_redis_ttl_secs")]
    pub ttl_secs: u64,

    /// Per-command timeout in milliseconds (0 = unbounded)
    #[serde(default)]
    pub operation_timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_ttl_secs() -> u64 {
    3600
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            ttl_secs: default_redis_ttl_secs(),
            operation_timeout_ms: 0,
        }
    }
}

impl RedisConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Retry and coalescing around remote calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,

    /// Merge concurrent identical reads and loads
    #[serde(default)]
    pub singleflight: bool,

    /// Attempts per call (0 = default of 3)
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    /// Base delay between attempts in milliseconds (0 = default of 20)
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_retry_enabled() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    20
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            singleflight: false,
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.delay_ms))
    }
}

/// Background promotion of remote hits into the local tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Jobs queued beyond this are dropped
    #[serde(default = "default_backfill_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_backfill_queue_capacity() -> usize {
    1024
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_backfill_queue_capacity(),
        }
    }
}

/// Load settings from `path` (or [`DEFAULT_CONFIG_FILE`] when present) and
/// `LAYERCACHE__*` environment variables, then validate.
pub fn load_settings(path: Option<&str>) -> CacheResult<CacheSettings> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            let pathbuf = PathBuf::from(p);
            if !pathbuf.exists() {
                return Err(CacheError::Config(format!("config file not found: {p}")));
            }
            builder = builder.add_source(File::from(pathbuf));
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path));
            }
        }
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );

    let settings: CacheSettings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = CacheSettings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.local.enabled);
        assert!(!settings.redis.enabled);
        assert!(settings.retry.enabled);
        assert!(!settings.retry.singleflight);
        assert_eq!(settings.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut settings = CacheSettings::default();
        settings.local.capacity = 0;
        assert!(matches!(settings.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_redis_requires_url() {
        let mut settings = CacheSettings::default();
        settings.redis.enabled = true;
        settings.redis.url = "  ".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_field_defaults() {
        let settings: CacheSettings = toml_from_str(
            r#"
            prefix = "user:"
            [local]
            capacity = 2
            "#,
        );
        assert_eq!(settings.prefix, "user:");
        assert_eq!(settings.local.capacity, 2);
        assert_eq!(settings.local.ttl_secs, 300);
        assert_eq!(settings.redis.url, "redis://localhost:6379");
    }

    fn toml_from_str(raw: &str) -> CacheSettings {
        Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
