use anyhow::{Result, bail};
use colored::Colorize;
use layercache::{RemoteStore, StoreRegistry};

use super::STORE_NAME;
use crate::config::AppConfig;
use crate::output::print_success;

pub async fn ping(config: &AppConfig, registry: &StoreRegistry) -> Result<()> {
    let redis = &config.cache.redis;
    if !redis.enabled {
        bail!("redis is disabled; set redis.enabled = true or LAYERCACHE__REDIS__ENABLED=true");
    }

    let store = registry.connect(STORE_NAME, redis).await?;
    print_success(&format!("{} is reachable", redis.url));
    println!("{}: {}", "Backend".cyan(), store.backend());
    println!("{}: {}", "Pool size".cyan(), redis.pool_size);
    println!("{}: {}s", "TTL".cyan(), redis.ttl_secs);
    Ok(())
}
