use anyhow::{Context, Result, bail};
use layercache::StoreRegistry;
use serde_json::Value;

use super::{open_cache, parse_key};
use crate::cli::{DelArgs, GetArgs, OutputFormat, PutArgs};
use crate::config::AppConfig;
use crate::output::{print_miss, print_success, print_value, print_warning};

const DEFAULT_ID_FIELD: &str = "id";

pub async fn get(
    config: &AppConfig,
    registry: &StoreRegistry,
    args: &GetArgs,
    format: OutputFormat,
) -> Result<()> {
    let cache = open_cache(config, registry, DEFAULT_ID_FIELD).await?;
    let found = cache
        .get(&args.name, &parse_key(&args.key))
        .await
        .into_result()?;
    cache.shutdown().await;

    if found.is_null() {
        print_miss(&args.key);
    } else {
        print_value(&found, format);
    }
    Ok(())
}

pub async fn put(config: &AppConfig, registry: &StoreRegistry, args: &PutArgs) -> Result<()> {
    let record: Value = serde_json::from_str(&args.value).context("value must be valid JSON")?;
    match record.get(&args.id_field) {
        None | Some(Value::Null) => {
            bail!("record has no `{}` field to identify it", args.id_field)
        }
        Some(_) => {}
    }

    let cache = open_cache(config, registry, &args.id_field).await?;
    cache
        .set(&args.name, &parse_key(&args.key), record)
        .await
        .into_result()?;
    cache.shutdown().await;

    print_success(&format!("stored {} under {}", args.name, args.key));
    Ok(())
}

pub async fn del(
    config: &AppConfig,
    registry: &StoreRegistry,
    args: &DelArgs,
    format: OutputFormat,
) -> Result<()> {
    let cache = open_cache(config, registry, DEFAULT_ID_FIELD).await?;
    let outcome = cache.del(&parse_key(&args.key)).await;
    cache.shutdown().await;

    if let Some(err) = outcome.err() {
        print_warning(&format!("partial delete: {err}"));
    }
    let removed = outcome.into_data();
    if removed.is_null() {
        print_miss(&args.key);
    } else {
        print_success(&format!("deleted {}", args.key));
        print_value(&removed, format);
    }
    Ok(())
}
