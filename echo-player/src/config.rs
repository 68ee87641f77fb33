//! echo-player configuration
//!
//! Layers, highest priority first:
//! 1. Command-line arguments / environment variables (via clap)
//! 2. `[player]` table of the TOML config file
//! 3. Built-in defaults derived from the data folder

use std::path::{Path, PathBuf};
use std::time::Duration;

use echo_common::config::parse_byte_size;
use serde::Deserialize;

use crate::error::Result;

/// Bitrate requested from the provider for downloadable assets
pub const AUDIO_BITRATE_KBPS: u32 = 320;

/// Opus bitrate of transcoder output
pub const OPUS_OUTPUT_BITRATE_KBPS: u32 = 192;

pub const VOLUME_MIN: u8 = 0;
pub const VOLUME_MAX: u8 = 100;
pub const VOLUME_DEFAULT: u8 = 100;

/// Position clock resolution
pub const POSITION_TICK: Duration = Duration::from_secs(1);

/// Now-playing refresh interval while playing
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(5000);

/// Bounded poll for a cache commit finished by another writer
pub const COMMIT_POLL_ATTEMPTS: u32 = 10;
pub const COMMIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub const DEFAULT_CACHE_LIMIT: &str = "2GB";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_SKIP_SEGMENTS_COOLDOWN_MINUTES: u64 = 5;

/// Shape of the TOML config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub data_dir: Option<PathBuf>,
    pub player: PlayerSection,
}

/// Optional player settings from one configuration layer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayerSection {
    pub cache_dir: Option<PathBuf>,
    pub cache_limit: Option<String>,
    pub database: Option<PathBuf>,
    pub ffmpeg_path: Option<String>,
    pub provider_base_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub skip_segments_enabled: Option<bool>,
    pub skip_segments_cooldown_minutes: Option<u64>,
}

impl PlayerSection {
    /// Overlay `higher` on top of `self`; set fields in `higher` win
    pub fn merge(self, higher: PlayerSection) -> PlayerSection {
        PlayerSection {
            cache_dir: higher.cache_dir.or(self.cache_dir),
            cache_limit: higher.cache_limit.or(self.cache_limit),
            database: higher.database.or(self.database),
            ffmpeg_path: higher.ffmpeg_path.or(self.ffmpeg_path),
            provider_base_url: higher.provider_base_url.or(self.provider_base_url),
            provider_api_key: higher.provider_api_key.or(self.provider_api_key),
            skip_segments_enabled: higher.skip_segments_enabled.or(self.skip_segments_enabled),
            skip_segments_cooldown_minutes: higher
                .skip_segments_cooldown_minutes
                .or(self.skip_segments_cooldown_minutes),
        }
    }
}

/// Resolved player configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub cache_limit_bytes: u64,
    pub database: PathBuf,
    pub ffmpeg_path: String,
    pub provider_base_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub skip_segments_enabled: bool,
    pub skip_segments_cooldown: Duration,
}

impl PlayerConfig {
    /// Fill unset fields with defaults relative to `data_dir`
    pub fn resolve(data_dir: &Path, section: PlayerSection) -> Result<Self> {
        let cache_limit = section
            .cache_limit
            .as_deref()
            .unwrap_or(DEFAULT_CACHE_LIMIT);

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            cache_dir: section.cache_dir.unwrap_or_else(|| data_dir.join("cache")),
            cache_limit_bytes: parse_byte_size(cache_limit)?,
            database: section
                .database
                .unwrap_or_else(|| data_dir.join("db.sqlite")),
            ffmpeg_path: section
                .ffmpeg_path
                .unwrap_or_else(|| DEFAULT_FFMPEG.to_string()),
            provider_base_url: section.provider_base_url,
            provider_api_key: section.provider_api_key,
            skip_segments_enabled: section.skip_segments_enabled.unwrap_or(false),
            skip_segments_cooldown: Duration::from_secs(
                60 * section
                    .skip_segments_cooldown_minutes
                    .unwrap_or(DEFAULT_SKIP_SEGMENTS_COOLDOWN_MINUTES),
            ),
        })
    }
}
