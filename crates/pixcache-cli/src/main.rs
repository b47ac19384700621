//! Pixcache CLI - cached reads of the illustration API from a shell.
//!
//! Results are printed to stdout as JSON lines; logs go to stderr.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pixcache_core::{EngineConfig, PixCache, PixCacheBuilder};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::ResourceArgs;

#[derive(Parser, Debug)]
#[command(name = "pixcache")]
#[command(about = "Cached, coalesced access to the illustration API")]
struct Args {
    /// JSON config file (missing fields take defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database path (defaults to the platform cache directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Bypass cached data for this read
    #[arg(short, long, global = true)]
    force: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a resource through the cache
    #[command(flatten)]
    Read(ResourceArgs),

    /// Drop one resource from the cache
    Invalidate {
        #[command(subcommand)]
        resource: ResourceArgs,
    },

    /// Drop every cached resource
    InvalidateAll,

    /// Delete records older than the configured retention
    Purge,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if config.access_token.is_none() {
        config.access_token = std::env::var("PIXCACHE_ACCESS_TOKEN").ok();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = load_config(args.config.as_ref())?;
    let db_path = match args.db {
        Some(path) => path,
        None => PixCacheBuilder::default_db_path()?,
    };
    debug!("Using database {}", db_path.display());

    let cache = PixCache::builder()
        .with_config(config)
        .with_db_path(&db_path)
        .build()?;

    match args.command {
        Command::Read(resource) => commands::read(&cache, resource, args.force).await?,
        Command::Invalidate { resource } => {
            let key = resource.into_key();
            let removed = cache.invalidate(&key).await?;
            commands::print_json(&serde_json::json!({
                "key": key.storage_key(),
                "removed": removed,
            }))?;
        }
        Command::InvalidateAll => {
            cache.invalidate_all().await?;
            info!("Cache cleared");
        }
        Command::Purge => {
            let purged = cache.purge_expired().await?;
            commands::print_json(&serde_json::json!({ "purged": purged }))?;
        }
    }

    Ok(())
}
