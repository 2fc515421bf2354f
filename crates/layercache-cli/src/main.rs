mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;
use layercache::StoreRegistry;

use cli::{Cli, Commands, ConfigCommands};
use output::print_error;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();
    let cfg = config::load_config(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&cfg.logging.level);
    observability::init_tracing_with_level(level);
    tracing::debug!(
        file = cli.config.as_deref().unwrap_or("(default)"),
        prefix = %cfg.cache.prefix,
        redis = cfg.cache.redis.enabled,
        "settings loaded"
    );

    if let Commands::Config(args) = &cli.command {
        return match args.command {
            ConfigCommands::Show => commands::config::show(&cfg),
            ConfigCommands::Check => commands::config::check(&cfg),
        };
    }

    cfg.validate()?;
    let registry = StoreRegistry::new();

    let result = match &cli.command {
        Commands::Ping => commands::ping::ping(&cfg, &registry).await,
        Commands::Get(args) => commands::entry::get(&cfg, &registry, args, format).await,
        Commands::Put(args) => commands::entry::put(&cfg, &registry, args).await,
        Commands::Del(args) => commands::entry::del(&cfg, &registry, args, format).await,
        Commands::Config(_) => Ok(()),
    };

    registry.shutdown();
    result
}
