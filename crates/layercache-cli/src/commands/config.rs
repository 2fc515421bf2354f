use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::output::print_success;

pub fn show(config: &AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("render settings")?;
    println!("{rendered}");
    Ok(())
}

pub fn check(config: &AppConfig) -> Result<()> {
    config.validate()?;
    let tiers = match (config.cache.local.enabled, config.cache.redis.enabled) {
        (true, true) => "local + redis",
        (true, false) => "local",
        (false, true) => "redis",
        (false, false) => "none",
    };
    print_success(&format!("configuration is valid (tiers: {tiers})"));
    Ok(())
}
