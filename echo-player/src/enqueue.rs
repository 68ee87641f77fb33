//! Query → queue
//!
//! Resolves a request into tracks, adds them to a player and gets playback
//! going. Voice-channel selection and reply rendering belong to the caller.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::info;

use crate::error::{Error, Result};
use crate::playback::{Player, QueuedTrack, SourceKind, TrackMetadata};
use crate::provider::MetadataProvider;
use crate::segments::SkipSegmentAdjuster;

/// Results taken from a search query
const SEARCH_LIMIT: usize = 1;

/// What to add
#[derive(Debug, Clone)]
pub enum QuerySource {
    Search(String),
    /// Pre-resolved tracks (e.g. picked from autocomplete)
    Tracks(Vec<TrackMetadata>),
    Upload {
        url: String,
        name: String,
        content_type: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct AddRequest {
    pub source: QuerySource,
    /// Text channel the request came from
    pub channel_id: String,
    pub requested_by: String,
    /// Voice channel to join if not connected
    pub voice_channel_id: String,
    pub front: bool,
    pub shuffle: bool,
    pub skip_current: bool,
}

#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub added: Vec<TrackMetadata>,
    /// Playback was (re)started by this request
    pub started_playback: bool,
    pub skipped_current: bool,
}

impl AddOutcome {
    /// Short confirmation for the caller to display
    pub fn summary(&self, front: bool) -> String {
        let Some(first) = self.added.first() else {
            return "nothing added".to_string();
        };
        let skipped = if self.skipped_current {
            " and current track skipped"
        } else {
            ""
        };

        if self.added.len() == 1 {
            format!(
                "**{}** added to the{} queue{}",
                first.display_name(),
                if front { " front of the" } else { "" },
                skipped
            )
        } else {
            format!(
                "**{}** and {} other songs were added to the queue{}",
                first.display_name(),
                self.added.len() - 1,
                skipped
            )
        }
    }
}

fn is_mp3(name: &str, content_type: Option<&str>) -> bool {
    content_type
        .map(|c| c.to_ascii_lowercase().contains("audio/mpeg"))
        .unwrap_or(false)
        || name.to_ascii_lowercase().ends_with(".mp3")
}

pub struct QueueService {
    provider: Arc<dyn MetadataProvider>,
    adjuster: SkipSegmentAdjuster,
}

impl QueueService {
    pub fn new(provider: Arc<dyn MetadataProvider>, adjuster: SkipSegmentAdjuster) -> Self {
        Self { provider, adjuster }
    }

    async fn resolve(&self, source: QuerySource) -> Result<(Vec<TrackMetadata>, bool)> {
        match source {
            QuerySource::Tracks(tracks) => Ok((tracks, false)),
            QuerySource::Search(query) => {
                if query.trim().is_empty() {
                    return Err(Error::InvalidInput(
                        "provide a search query or attach an mp3".to_string(),
                    ));
                }
                Ok((self.provider.search(&query, SEARCH_LIMIT).await?, false))
            }
            QuerySource::Upload {
                url,
                name,
                content_type,
            } => {
                if !is_mp3(&name, content_type.as_deref()) {
                    return Err(Error::InvalidInput(
                        "only mp3 attachments are supported".to_string(),
                    ));
                }
                Ok((
                    vec![TrackMetadata {
                        url,
                        title: name,
                        artist: "Uploaded file".to_string(),
                        length_seconds: 0,
                        offset_seconds: 0,
                        is_live: false,
                        thumbnail_url: None,
                        playlist: None,
                        source: SourceKind::UploadedFile,
                    }],
                    true,
                ))
            }
        }
    }

    /// Add the request's tracks to `player` and start playback as needed
    pub async fn add_to_queue(&self, player: &Player, request: AddRequest) -> Result<AddOutcome> {
        let (mut tracks, is_upload) = self.resolve(request.source).await?;
        if tracks.is_empty() {
            return Err(Error::InvalidInput("no songs found".to_string()));
        }

        if request.shuffle && tracks.len() > 1 {
            tracks.shuffle(&mut rand::thread_rng());
        }

        if !is_upload {
            let mut adjusted = Vec::with_capacity(tracks.len());
            for track in tracks {
                adjusted.push(self.adjuster.adjust(track).await);
            }
            tracks = adjusted;
        }

        let queued: Vec<QueuedTrack> = tracks
            .iter()
            .cloned()
            .map(|t| QueuedTrack::new(t, request.channel_id.clone(), request.requested_by.clone()))
            .collect();
        player.add_all(queued, request.front).await;

        let mut started_playback = false;
        if !player.is_connected().await {
            player.connect(&request.voice_channel_id).await?;
            player.play().await?;
            started_playback = true;
        } else if player.state() == crate::playback::TransportState::Idle {
            player.play().await?;
            started_playback = true;
        }

        let mut skipped_current = false;
        if request.skip_current {
            if !player.can_go_forward(1).await {
                return Err(Error::NoTrackToNavigateTo("no song to skip to".to_string()));
            }
            player.forward(1).await?;
            skipped_current = true;
        }

        info!(
            guild = %player.guild_id(),
            added = tracks.len(),
            started = started_playback,
            "Added tracks to queue"
        );

        Ok(AddOutcome {
            added: tracks,
            started_playback,
            skipped_current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str) -> TrackMetadata {
        TrackMetadata {
            url: "1".to_string(),
            title: title.to_string(),
            artist: "Artist".to_string(),
            length_seconds: 100,
            offset_seconds: 0,
            is_live: false,
            thumbnail_url: None,
            playlist: None,
            source: SourceKind::ProviderAsset,
        }
    }

    #[test]
    fn test_mp3_detection() {
        assert!(is_mp3("song.MP3", None));
        assert!(is_mp3("blob", Some("audio/mpeg")));
        assert!(!is_mp3("video.mp4", Some("video/mp4")));
    }

    #[test]
    fn test_summary_wording() {
        let single = AddOutcome {
            added: vec![meta("One")],
            started_playback: false,
            skipped_current: false,
        };
        assert_eq!(single.summary(true), "**One - Artist** added to the front of the queue");

        let many = AddOutcome {
            added: vec![meta("One"), meta("Two"), meta("Three")],
            started_playback: true,
            skipped_current: true,
        };
        assert_eq!(
            many.summary(false),
            "**One - Artist** and 2 other songs were added to the queue and current track skipped"
        );
    }
}
