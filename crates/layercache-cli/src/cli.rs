use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "layercache")]
#[command(about = "layercache CLI: inspect and manage cached records")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to ./layercache.toml when present)
    #[arg(short, long, global = true, env = "LAYERCACHE_CONFIG")]
    pub config: Option<String>,

    /// Log level (overrides logging.level; RUST_LOG wins over both)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Compact,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the configured Redis is reachable
    Ping,
    /// Read a record through the cache tiers
    Get(GetArgs),
    /// Write a JSON record through every tier
    Put(PutArgs),
    /// Delete a record and all of its aliases
    Del(DelArgs),
    /// Inspect the effective configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct GetArgs {
    /// Record name (namespace of the canonical key)
    #[arg(short, long)]
    pub name: String,
    /// Lookup key; valid JSON (e.g. 42) is used as-is, anything else as a string
    pub key: String,
}

#[derive(clap::Args)]
pub struct PutArgs {
    /// Record name (namespace of the canonical key)
    #[arg(short, long)]
    pub name: String,
    /// Request key the record is stored under
    pub key: String,
    /// Record body as JSON
    pub value: String,
    /// Field holding the record identity
    #[arg(long, default_value = "id")]
    pub id_field: String,
}

#[derive(clap::Args)]
pub struct DelArgs {
    /// Any key of the record (request key or identity)
    pub key: String,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the merged file + environment settings as TOML
    Show,
    /// Validate the settings and report problems
    Check,
}
