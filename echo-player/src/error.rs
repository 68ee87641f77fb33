//! Error types for echo-player
//!
//! Navigation and query-shape errors are surfaced to the caller for reporting.
//! Source failures are recovered locally by the playback engine, which skips to
//! the next track instead of stalling.

use thiserror::Error;

/// Main error type for echo-player
#[derive(Error, Debug)]
pub enum Error {
    /// Transport operation attempted without a voice session
    #[error("Not connected to a voice channel")]
    NotConnected,

    /// Play requested with no current track
    #[error("Queue empty")]
    QueueEmpty,

    /// Forward/back/seek/skip with nothing to act on
    #[error("No track to navigate to: {0}")]
    NoTrackToNavigateTo(String),

    /// Seek target beyond the current track's length
    #[error("Seek position {position}s is outside the range of the track ({length}s)")]
    SeekOutOfRange { position: u64, length: u64 },

    /// Download or transcode failed
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Cache commit never reached a nonzero size, or rename/indexing failed
    #[error("Cache write failed: {0}")]
    CacheWriteFailed(String),

    /// Hash format violation (possible path traversal)
    #[error("Invalid cache key: {0:?}")]
    InvalidCacheKey(String),

    /// Operation not valid in current transport state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid caller-supplied argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Metadata provider request failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// Voice transport failure
    #[error("Voice error: {0}")]
    Voice(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors bubbled up from echo-common
    #[error(transparent)]
    Common(#[from] echo_common::Error),
}

impl Error {
    /// Whether the playback engine should skip the track rather than stall
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable(_) | Error::CacheWriteFailed(_) | Error::Provider(_)
        )
    }

    /// Short human-readable message for playback-control failures
    pub fn user_message(&self) -> String {
        match self {
            Error::NotConnected => "not connected to a voice channel".to_string(),
            Error::QueueEmpty => "queue is empty".to_string(),
            Error::NoTrackToNavigateTo(what) => what.clone(),
            Error::SeekOutOfRange { .. } => "can't seek past the end of the track".to_string(),
            Error::SourceUnavailable(_) | Error::Provider(_) => {
                "couldn't load that track".to_string()
            }
            Error::InvalidState(what) | Error::InvalidInput(what) => what.clone(),
            _ => "something went wrong".to_string(),
        }
    }
}

/// Convenience Result type using echo-player Error
pub type Result<T> = std::result::Result<T, Error>;
