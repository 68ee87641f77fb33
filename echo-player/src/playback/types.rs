//! Playback data model
//!
//! Track metadata as returned by the provider, queued tracks carrying the
//! requester context, transport state and loop mode.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a track's audio comes from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Downloadable asset from the metadata provider (downloaded then cached)
    ProviderAsset,
    /// Live stream URL handed straight to the transcoder
    LiveStream,
    /// Uploaded file URL (transcoded and cached on first play)
    UploadedFile,
}

/// Playlist a track was added from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistRef {
    pub title: String,
    pub source: String,
}

/// Immutable track metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackMetadata {
    /// Provider track id, stream URL or upload URL depending on `source`
    pub url: String,
    pub title: String,
    pub artist: String,
    /// Playable length, excluding any trimmed outro
    pub length_seconds: u64,
    /// Intro to skip at the start of the source
    pub offset_seconds: u64,
    pub is_live: bool,
    pub thumbnail_url: Option<String>,
    pub playlist: Option<PlaylistRef>,
    pub source: SourceKind,
}

impl TrackMetadata {
    /// Absolute source position where playback should stop
    pub fn end_seconds(&self) -> u64 {
        self.offset_seconds + self.length_seconds
    }

    /// `title - artist` display string
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.title, self.artist)
    }
}

/// Track accepted into a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTrack {
    /// Unique per queue insertion (a loop re-insertion gets a fresh id)
    pub entry_id: Uuid,
    pub metadata: TrackMetadata,
    pub added_in_channel_id: String,
    pub requested_by: String,
}

impl QueuedTrack {
    pub fn new(
        metadata: TrackMetadata,
        added_in_channel_id: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            metadata,
            added_in_channel_id: added_in_channel_id.into(),
            requested_by: requested_by.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.metadata.url
    }

    /// Playlist batch members always append, never jump the queue
    pub fn is_playlist_member(&self) -> bool {
        self.metadata.playlist.is_some()
    }

    /// Copy for re-appending when looping the queue
    pub fn requeued(&self) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            ..self.clone()
        }
    }
}

/// Transport state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Playing,
    Paused,
    /// No active audio resource (queue exhausted or stopped)
    Idle,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::Playing => write!(f, "playing"),
            TransportState::Paused => write!(f, "paused"),
            TransportState::Idle => write!(f, "idle"),
        }
    }
}

/// Loop mode
///
/// Looping the track and looping the queue are mutually exclusive, so they
/// share one field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    pub fn loops_track(self) -> bool {
        self == LoopMode::Track
    }

    pub fn loops_queue(self) -> bool {
        self == LoopMode::Queue
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_end_seconds_adds_offset() {
        let mut metadata = track("1");
        metadata.offset_seconds = 12;
        metadata.length_seconds = 100;
        assert_eq!(metadata.end_seconds(), 112);
    }

    #[test]
    fn test_requeued_gets_fresh_id() {
        let original = queued("1");
        let copy = original.requeued();
        assert_ne!(original.entry_id, copy.entry_id);
        assert_eq!(original.metadata, copy.metadata);
    }

    #[test]
    fn test_source_kind_serialization() {
        let json = serde_json::to_string(&SourceKind::LiveStream).unwrap();
        assert_eq!(json, "\"live_stream\"");
    }

    #[test]
    fn test_transport_state_display() {
        assert_eq!(TransportState::Idle.to_string(), "idle");
        assert_eq!(TransportState::Playing.to_string(), "playing");
    }
}
