//! Guild settings store
//!
//! Read-only from the engine's point of view. Any failure to read falls back
//! to built-in defaults.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::config::VOLUME_DEFAULT;
use crate::error::Result;

/// Per-guild playback preferences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSettings {
    pub default_volume: u8,
    pub duck_enabled: bool,
    /// Volume applied while someone is speaking
    pub duck_target: u8,
    /// Disconnect after this long idle; zero disables
    pub idle_disconnect_seconds: u64,
    pub auto_announce_next_track: bool,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            default_volume: VOLUME_DEFAULT,
            duck_enabled: false,
            duck_target: 20,
            idle_disconnect_seconds: 30,
            auto_announce_next_track: false,
        }
    }
}

#[async_trait]
pub trait GuildSettingsStore: Send + Sync {
    /// Settings row for `guild_id`, if one exists
    async fn fetch(&self, guild_id: &str) -> Result<Option<GuildSettings>>;
}

/// Fetch settings, substituting defaults when missing or unavailable
pub async fn fetch_or_default(store: &dyn GuildSettingsStore, guild_id: &str) -> GuildSettings {
    match store.fetch(guild_id).await {
        Ok(Some(settings)) => settings,
        Ok(None) => GuildSettings::default(),
        Err(e) => {
            warn!("Guild settings unavailable for {}, using defaults: {}", guild_id, e);
            GuildSettings::default()
        }
    }
}

/// `guild_settings` table
pub struct SqliteGuildSettings {
    pool: SqlitePool,
}

impl SqliteGuildSettings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, guild_id: &str, settings: &GuildSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO guild_settings (
                guild_id, default_volume, duck_enabled, duck_target,
                idle_disconnect_seconds, auto_announce_next_track
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                default_volume = excluded.default_volume,
                duck_enabled = excluded.duck_enabled,
                duck_target = excluded.duck_target,
                idle_disconnect_seconds = excluded.idle_disconnect_seconds,
                auto_announce_next_track = excluded.auto_announce_next_track
            "#,
        )
        .bind(guild_id)
        .bind(i64::from(settings.default_volume))
        .bind(settings.duck_enabled)
        .bind(i64::from(settings.duck_target))
        .bind(i64::try_from(settings.idle_disconnect_seconds).unwrap_or(i64::MAX))
        .bind(settings.auto_announce_next_track)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn volume_from_db(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}

#[async_trait]
impl GuildSettingsStore for SqliteGuildSettings {
    async fn fetch(&self, guild_id: &str) -> Result<Option<GuildSettings>> {
        let row = sqlx::query(
            r#"
            SELECT default_volume, duck_enabled, duck_target,
                   idle_disconnect_seconds, auto_announce_next_track
            FROM guild_settings WHERE guild_id = ?
            "#,
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(GuildSettings {
            default_volume: volume_from_db(row.try_get("default_volume")?),
            duck_enabled: row.try_get("duck_enabled")?,
            duck_target: volume_from_db(row.try_get("duck_target")?),
            idle_disconnect_seconds: u64::try_from(row.try_get::<i64, _>("idle_disconnect_seconds")?)
                .unwrap_or(0),
            auto_announce_next_track: row.try_get("auto_announce_next_track")?,
        }))
    }
}
