//! Skip-segment adjustment
//!
//! Trims non-music intros and outros from provider assets using segment data
//! from an external service. Lookups are best-effort: failures leave the
//! track unchanged, and a degraded service puts lookups on cooldown.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::kv_cache::{KeyValueCache, ONE_HOUR};
use crate::playback::{SourceKind, TrackMetadata};

/// Intro/outro detection tolerance at the track edges
const EDGE_TOLERANCE_SECONDS: f64 = 2.0;

const SPONSORBLOCK_BASE_URL: &str = "https://sponsor.ajay.app";
const SEGMENT_CATEGORY: &str = "music_offtopic";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Span to skip, in seconds from the start of the source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Error)]
pub enum SegmentLookupError {
    /// Service overloaded or timing out; stop asking for a while
    #[error("segment service degraded: {0}")]
    Degraded(String),

    #[error("segment lookup failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn segments(&self, track_url: &str) -> Result<Vec<Segment>, SegmentLookupError>;
}

/// Sort by start and merge overlapping spans
pub fn merge_segments(mut segments: Vec<Segment>) -> Vec<Segment> {
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(previous) if previous.end > segment.start => {
                previous.end = previous.end.max(segment.end);
            }
            _ => merged.push(segment),
        }
    }
    merged
}

/// Trim an outro ending near the track end and skip an intro starting near zero
pub fn apply_segments(track: &mut TrackMetadata, segments: &[Segment]) {
    let merged = merge_segments(segments.to_vec());

    if let Some(outro) = merged.last() {
        if outro.end >= track.length_seconds as f64 - EDGE_TOLERANCE_SECONDS {
            let trimmed = (outro.end - outro.start).max(0.0) as u64;
            track.length_seconds = track.length_seconds.saturating_sub(trimmed);
        }
    }

    if let Some(intro) = merged.first() {
        if intro.start <= EDGE_TOLERANCE_SECONDS {
            track.offset_seconds = intro.end.max(0.0).floor() as u64;
            track.length_seconds = track.length_seconds.saturating_sub(track.offset_seconds);
        }
    }
}

pub struct SkipSegmentAdjuster {
    source: Option<Arc<dyn SegmentSource>>,
    cache: Option<Arc<KeyValueCache>>,
    cooldown: Duration,
    disabled_until: Mutex<Option<Instant>>,
}

impl SkipSegmentAdjuster {
    pub fn new(
        source: Arc<dyn SegmentSource>,
        cache: Option<Arc<KeyValueCache>>,
        cooldown: Duration,
    ) -> Self {
        Self {
            source: Some(source),
            cache,
            cooldown,
            disabled_until: Mutex::new(None),
        }
    }

    /// Adjuster that never changes anything
    pub fn disabled() -> Self {
        Self {
            source: None,
            cache: None,
            cooldown: Duration::ZERO,
            disabled_until: Mutex::new(None),
        }
    }

    pub fn in_cooldown(&self) -> bool {
        let guard = self.disabled_until.lock().unwrap_or_else(|e| e.into_inner());
        matches!(*guard, Some(until) if Instant::now() < until)
    }

    fn start_cooldown(&self) {
        let mut guard = self.disabled_until.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Instant::now() + self.cooldown);
    }

    /// Apply skip segments to a provider asset; anything else passes through
    pub async fn adjust(&self, mut track: TrackMetadata) -> TrackMetadata {
        let Some(source) = &self.source else {
            return track;
        };
        if track.source != SourceKind::ProviderAsset || track.url.is_empty() || self.in_cooldown() {
            return track;
        }

        match self.lookup(source.as_ref(), &track.url).await {
            Ok(segments) => apply_segments(&mut track, &segments),
            Err(SegmentLookupError::Degraded(reason)) => {
                warn!(
                    "Segment service degraded, pausing lookups for {:?}: {}",
                    self.cooldown, reason
                );
                self.start_cooldown();
            }
            Err(e) => debug!("Could not fetch skip segments for {:?}: {}", track.url, e),
        }

        track
    }

    async fn lookup(
        &self,
        source: &dyn SegmentSource,
        track_url: &str,
    ) -> Result<Vec<Segment>, SegmentLookupError> {
        let key = KeyValueCache::derive_key("skip-segments", &[track_url]);

        if let Some(cache) = &self.cache {
            match cache.get::<Vec<Segment>>(&key).await {
                Ok(Some(hit)) => return Ok(hit),
                Ok(None) => {}
                Err(e) => debug!("Segment cache read failed: {}", e),
            }
        }

        let segments = source.segments(track_url).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&key, &segments, ONE_HOUR).await {
                debug!("Segment cache write failed: {}", e);
            }
        }

        Ok(segments)
    }
}

#[derive(Debug, Deserialize)]
struct SponsorBlockSegment {
    segment: (f64, f64),
}

/// SponsorBlock `skipSegments` client
pub struct SponsorBlockSource {
    http_client: reqwest::Client,
    base_url: String,
}

impl SponsorBlockSource {
    pub fn new() -> Result<Self, SegmentLookupError> {
        Self::with_base_url(SPONSORBLOCK_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SegmentLookupError> {
        let http_client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|e| SegmentLookupError::Failed(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SegmentSource for SponsorBlockSource {
    async fn segments(&self, track_url: &str) -> Result<Vec<Segment>, SegmentLookupError> {
        let categories = format!("[\"{}\"]", SEGMENT_CATEGORY);
        let response = self
            .http_client
            .get(format!("{}/api/skipSegments", self.base_url))
            .query(&[("videoID", track_url), ("categories", categories.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SegmentLookupError::Degraded(e.to_string())
                } else {
                    SegmentLookupError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // No segments recorded for this track
            return Ok(Vec::new());
        }
        if status == reqwest::StatusCode::GATEWAY_TIMEOUT {
            return Err(SegmentLookupError::Degraded(status.to_string()));
        }
        if !status.is_success() {
            return Err(SegmentLookupError::Failed(status.to_string()));
        }

        let raw: Vec<SponsorBlockSegment> = response
            .json()
            .await
            .map_err(|e| SegmentLookupError::Failed(e.to_string()))?;

        Ok(raw
            .into_iter()
            .map(|s| Segment {
                start: s.segment.0,
                end: s.segment.1,
            })
            .collect())
    }
}
