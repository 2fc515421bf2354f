pub mod config;
pub mod entry;
pub mod ping;

use std::sync::Arc;

use anyhow::Result;
use layercache::{Cache, CacheBuilder, RemoteStore, StoreRegistry};
use serde_json::Value;

use crate::config::AppConfig;

/// Registry name of the CLI's Redis client.
pub const STORE_NAME: &str = "default";

/// Build a JSON record cache from the settings, connecting Redis if enabled.
///
/// Records are identified by `id_field`; a record without it has a null
/// identity.
pub async fn open_cache(
    config: &AppConfig,
    registry: &StoreRegistry,
    id_field: &str,
) -> Result<Cache<Value>> {
    let remote: Option<Arc<dyn RemoteStore>> = if config.cache.redis.enabled {
        let store: Arc<dyn RemoteStore> = registry.connect(STORE_NAME, &config.cache.redis).await?;
        Some(store)
    } else {
        None
    };

    let field = id_field.to_string();
    let cache = CacheBuilder::from_settings(&config.cache, remote)
        .is_zero(Value::is_null)
        .identify(move |record: &Value| record.get(&field).cloned().unwrap_or(Value::Null))
        .build()?;
    Ok(cache)
}

/// Interpret a command-line key: valid JSON is used as-is, anything else is a
/// plain string.
pub fn parse_key(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
