//! Metadata/search provider
//!
//! Search returns track metadata; download streams a provider asset at a
//! requested bitrate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::kv_cache::{KeyValueCache, ONE_HOUR};
use crate::playback::{SourceKind, TrackMetadata};

/// Raw asset bytes
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackMetadata>>;

    /// Stream the asset for `track_id` starting `offset_seconds` in
    async fn download(
        &self,
        track_id: &str,
        bitrate_kbps: u32,
        offset_seconds: u64,
    ) -> Result<ByteStream>;
}

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SEARCH_RETRIES: u32 = 2;
const RETRY_MIN: Duration = Duration::from_millis(250);
const RETRY_MAX: Duration = Duration::from_millis(1500);
const USER_AGENT: &str = concat!("echo-player/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: u64,
    title: String,
    duration: u64,
    artist: SearchArtist,
    album: Option<SearchAlbum>,
}

#[derive(Debug, Deserialize)]
struct SearchArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchAlbum {
    cover: Option<String>,
    cover_medium: Option<String>,
}

impl From<SearchHit> for TrackMetadata {
    fn from(hit: SearchHit) -> Self {
        let thumbnail_url = hit
            .album
            .and_then(|album| album.cover_medium.filter(|c| !c.is_empty()).or(album.cover));

        TrackMetadata {
            url: hit.id.to_string(),
            title: hit.title,
            artist: hit.artist.name,
            length_seconds: hit.duration,
            offset_seconds: 0,
            is_live: false,
            thumbnail_url,
            playlist: None,
            source: SourceKind::ProviderAsset,
        }
    }
}

/// Backoff before retry number `attempt` (0-based)
fn retry_delay(attempt: u32) -> Duration {
    RETRY_MIN
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RETRY_MAX)
}

/// HTTP client for the music provider API
pub struct HttpProvider {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    cache: Option<Arc<KeyValueCache>>,
}

impl HttpProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        cache: Option<Arc<KeyValueCache>>,
    ) -> Result<Self> {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        let key_header = HeaderValue::from_str(&api_key)
            .map_err(|e| Error::InvalidInput(format!("API key is not a valid header: {}", e)))?;
        headers.insert("X-API-Key", key_header);

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            cache,
        })
    }

    /// Stream URL for a provider asset
    pub fn stream_url(&self, track_id: &str, bitrate_kbps: u32, offset_seconds: u64) -> String {
        let mut url = format!(
            "{}/music/stream?id={}&key={}",
            self.base_url, track_id, self.api_key
        );
        if bitrate_kbps > 0 {
            url.push_str(&format!("&kbps={}", bitrate_kbps));
        }
        if offset_seconds > 0 {
            url.push_str(&format!("&offset={}", offset_seconds));
        }
        url
    }

    async fn search_once(&self, query: &str) -> Result<SearchResponse> {
        let response = self
            .http_client
            .get(format!("{}/music/search", self.base_url))
            .query(&[("q", query), ("offset", "0"), ("key", self.api_key.as_str())])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("search returned {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("malformed search response: {}", e)))
    }

    async fn search_with_retry(&self, query: &str, limit: usize) -> Result<Vec<TrackMetadata>> {
        let mut attempt = 0;
        let response = loop {
            match self.search_once(query).await {
                Ok(response) => break response,
                Err(e) if attempt < SEARCH_RETRIES => {
                    let delay = retry_delay(attempt);
                    debug!("Search retry {} failed: {} (retrying in {:?})", attempt + 1, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let tracks: Vec<TrackMetadata> = response
            .data
            .into_iter()
            .take(limit)
            .map(TrackMetadata::from)
            .collect();

        info!(query = %query, results = tracks.len(), "Provider search complete");
        Ok(tracks)
    }
}

#[async_trait]
impl MetadataProvider for HttpProvider {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackMetadata>> {
        match &self.cache {
            Some(cache) => {
                let key = KeyValueCache::derive_key("provider-search", &[query, &limit.to_string()]);
                cache
                    .wrap(&key, ONE_HOUR, || self.search_with_retry(query, limit))
                    .await
            }
            None => self.search_with_retry(query, limit).await,
        }
    }

    async fn download(
        &self,
        track_id: &str,
        bitrate_kbps: u32,
        offset_seconds: u64,
    ) -> Result<ByteStream> {
        let url = self.stream_url(track_id, bitrate_kbps, offset_seconds);
        debug!("Downloading provider asset {} at {} kbps", track_id, bitrate_kbps);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::SourceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Provider stream for {} returned {}", track_id, status);
            return Err(Error::SourceUnavailable(format!(
                "provider stream returned {}",
                status
            )));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .boxed())
    }
}
