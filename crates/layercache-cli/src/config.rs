//! CLI settings: the cache settings plus a logging section.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use layercache::CacheSettings;
use layercache::config::{DEFAULT_CONFIG_FILE, ENV_PREFIX};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            bail!("logging.level must be one of {valid_levels:?}");
        }
        Ok(())
    }
}

/// Merge the settings file and `LAYERCACHE__*` environment variables.
///
/// Validation is left to the caller so `config check` can report it.
pub fn load_config(path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            let pathbuf = PathBuf::from(p);
            if !pathbuf.exists() {
                bail!("config file not found: {p}");
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
    // Environment variable overrides, e.g., LAYERCACHE__REDIS__URL=redis://cache:6379
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );

    builder
        .build()
        .context("config build error")?
        .try_deserialize()
        .context("config deserialize error")
}
