//! Database initialization
//!
//! Creates the SQLite database on first run and idempotently creates every
//! table the playback services rely on:
//! - `file_cache`: index of committed cache files
//! - `key_value_cache`: expiring JSON results (search, skip segments)
//! - `guild_settings`: per-guild playback preferences

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers alongside the single cache writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_file_cache_table(pool).await?;
    create_key_value_cache_table(pool).await?;
    create_guild_settings_table(pool).await?;
    Ok(())
}

/// Create the file_cache table
///
/// One row per committed cache file. `accessed_at` and `created_at` are unix
/// milliseconds.
pub async fn create_file_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_cache (
            hash TEXT PRIMARY KEY,
            bytes INTEGER NOT NULL,
            accessed_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_cache_accessed_at ON file_cache(accessed_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_cache_created_at ON file_cache(created_at, hash)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the key_value_cache table
pub async fn create_key_value_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS key_value_cache (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the guild_settings table
///
/// Rows are optional; readers fall back to built-in defaults for guilds
/// without one.
pub async fn create_guild_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS guild_settings (
            guild_id TEXT PRIMARY KEY,
            default_volume INTEGER NOT NULL DEFAULT 100,
            duck_enabled INTEGER NOT NULL DEFAULT 0,
            duck_target INTEGER NOT NULL DEFAULT 20,
            idle_disconnect_seconds INTEGER NOT NULL DEFAULT 30,
            auto_announce_next_track INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
