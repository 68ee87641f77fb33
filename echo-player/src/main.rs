//! echo-player maintenance CLI
//!
//! Cache reconciliation, usage statistics and asset prefetching against the
//! same data folder the playback service uses.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use echo_common::config::{find_config_file, load_toml_or_default, resolve_data_folder, DATA_DIR_ENV};
use echo_common::time::from_millis;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use echo_player::cache::FileCache;
use echo_player::config::{ConfigFile, PlayerConfig, PlayerSection};
use echo_player::kv_cache::KeyValueCache;
use echo_player::playback::SourceResolver;
use echo_player::provider::{HttpProvider, MetadataProvider};
use echo_player::segments::{SkipSegmentAdjuster, SponsorBlockSource};

/// Command-line arguments for echo-player
#[derive(Parser, Debug)]
#[command(name = "echo-player")]
#[command(about = "Playback cache maintenance for echo")]
#[command(version)]
struct Args {
    /// Data folder (database and default cache location)
    #[arg(long, env = "ECHO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Cache directory
    #[arg(long, env = "ECHO_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Cache budget, e.g. "2GB" or "512MiB"
    #[arg(long, env = "ECHO_CACHE_LIMIT")]
    cache_limit: Option<String>,

    /// SQLite database file
    #[arg(long, env = "ECHO_DATABASE")]
    database: Option<PathBuf>,

    /// Metadata provider base URL
    #[arg(long, env = "ECHO_PROVIDER_URL")]
    provider_url: Option<String>,

    /// Metadata provider API key
    #[arg(long, env = "ECHO_PROVIDER_API_KEY", hide_env_values = true)]
    provider_api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the cache index with the filesystem, then evict
    Cleanup,
    /// Show cache usage
    Stats,
    /// Search and download the first result into the cache
    Prefetch {
        /// Search query
        query: String,
    },
}

impl Args {
    fn overrides(&self) -> PlayerSection {
        PlayerSection {
            cache_dir: self.cache_dir.clone(),
            cache_limit: self.cache_limit.clone(),
            database: self.database.clone(),
            provider_base_url: self.provider_url.clone(),
            provider_api_key: self.provider_api_key.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "echo_player=debug,echo_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting echo-player v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let config_path = find_config_file();
    let file: ConfigFile =
        load_toml_or_default(config_path.as_deref()).context("Failed to load config file")?;
    let data_dir = resolve_data_folder(args.data_dir.as_deref(), DATA_DIR_ENV);
    let config = PlayerConfig::resolve(&data_dir, file.player.merge(args.overrides()))
        .context("Invalid player configuration")?;

    info!("Data folder: {}", config.data_dir.display());
    info!("Database: {}", config.database.display());

    let pool = echo_common::db::init_database(&config.database)
        .await
        .context("Failed to open database")?;
    let cache = FileCache::open(&config.cache_dir, config.cache_limit_bytes, pool.clone())
        .await
        .context("Failed to open content cache")?;

    match args.command {
        Command::Cleanup => {
            let report = cache.cleanup_on_startup().await;
            let expired = KeyValueCache::new(pool)
                .purge_expired()
                .await
                .context("Failed to purge key/value cache")?;

            println!("orphan files removed:  {}", report.orphan_files_removed);
            println!("stale entries removed: {}", report.stale_entries_removed);
            println!("temp files removed:    {}", report.temp_files_removed);
            println!("expired results purged: {}", expired);
            println!("bytes in use:          {}", report.bytes_in_use);
        }
        Command::Stats => {
            let entries = cache.entry_count().await.context("Failed to count entries")?;
            let used = cache.usage_bytes().await.context("Failed to sum usage")?;
            let limit = cache.limit_bytes();
            let percent = if limit == 0 {
                0.0
            } else {
                used as f64 * 100.0 / limit as f64
            };

            println!("cache root: {}", cache.root().display());
            println!("entries:    {}", entries);
            println!("usage:      {} / {} bytes ({:.1}%)", used, limit, percent);

            let oldest = cache
                .index()
                .oldest_accessed()
                .await
                .context("Failed to read oldest entry")?;
            if let Some(stamp) = oldest.and_then(|e| from_millis(e.accessed_at)) {
                println!("next evicted: last used {}", stamp.to_rfc3339());
            }
        }
        Command::Prefetch { query } => {
            let (Some(base_url), Some(api_key)) =
                (config.provider_base_url.clone(), config.provider_api_key.clone())
            else {
                bail!("prefetch needs a provider URL and API key");
            };

            let kv = Arc::new(KeyValueCache::new(pool));
            let provider: Arc<dyn MetadataProvider> = Arc::new(
                HttpProvider::new(base_url, api_key, Some(Arc::clone(&kv)))
                    .context("Failed to build provider client")?,
            );
            let adjuster = if config.skip_segments_enabled {
                let source = SponsorBlockSource::new().context("Failed to build segment client")?;
                SkipSegmentAdjuster::new(Arc::new(source), Some(kv), config.skip_segments_cooldown)
            } else {
                SkipSegmentAdjuster::disabled()
            };

            let tracks = provider.search(&query, 1).await.context("Search failed")?;
            let Some(track) = tracks.into_iter().next() else {
                bail!("no results for {:?}", query);
            };
            let track = adjuster.adjust(track).await;

            let resolver = SourceResolver::new(Arc::clone(&cache), provider);
            let path = resolver
                .cached_asset(&track)
                .await
                .context("Download failed")?;
            cache.wait_for_eviction().await;

            println!("{} -> {}", track.display_name(), path.display());
            println!(
                "plays {}s starting at {}s",
                track.length_seconds, track.offset_seconds
            );
        }
    }

    Ok(())
}
