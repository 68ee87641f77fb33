//! Playable source resolution
//!
//! - Live streams: the URL goes straight to the transcoder.
//! - Provider assets: served from the content cache, downloading and
//!   committing on a miss before transcoding starts.
//! - Uploaded files: served from the cache when present, otherwise transcoded
//!   from the URL with the output tee'd into the cache.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::types::{SourceKind, TrackMetadata};
use crate::cache::FileCache;
use crate::config::{AUDIO_BITRATE_KBPS, COMMIT_POLL_ATTEMPTS, COMMIT_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::kv_cache::KeyValueCache;
use crate::provider::MetadataProvider;
use crate::transcode::{SourceDescriptor, SourceInput};

/// Cache key of a downloaded provider asset
pub fn asset_cache_key(track_url: &str) -> String {
    KeyValueCache::derive_key("mp3", &[track_url, &AUDIO_BITRATE_KBPS.to_string()])
}

/// Cache key of a transcoded upload
pub fn upload_cache_key(url: &str) -> String {
    KeyValueCache::derive_key("upload", &[url])
}

#[derive(Clone)]
pub struct SourceResolver {
    cache: Arc<FileCache>,
    provider: Arc<dyn MetadataProvider>,
}

impl SourceResolver {
    pub fn new(cache: Arc<FileCache>, provider: Arc<dyn MetadataProvider>) -> Self {
        Self { cache, provider }
    }

    /// Describe how to transcode `track` from absolute source second `seek`
    pub async fn resolve(&self, track: &TrackMetadata, seek: u64) -> Result<SourceDescriptor> {
        let end = track.end_seconds();

        match track.source {
            SourceKind::LiveStream => Ok(SourceDescriptor::new(SourceInput::Url(track.url.clone()))),
            SourceKind::ProviderAsset => {
                let path = self.cached_asset(track).await?;
                Ok(SourceDescriptor::new(SourceInput::File(path))
                    .seek(seek)
                    .until(end))
            }
            SourceKind::UploadedFile => self.resolve_upload(track, seek, end).await,
        }
    }

    /// Path of the cached asset, downloading it first on a miss
    pub async fn cached_asset(&self, track: &TrackMetadata) -> Result<PathBuf> {
        let key = asset_cache_key(&track.url);

        if let Some(path) = self.cache.lookup(&key).await? {
            debug!("Using cached asset for {}", track.title);
            return Ok(path);
        }

        match self.cache.begin_write(&key).await {
            Ok((mut writer, _pending)) => {
                info!("Downloading {} into cache", track.display_name());
                let mut body = self
                    .provider
                    .download(&track.url, AUDIO_BITRATE_KBPS, 0)
                    .await?;

                while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(|e| {
                        Error::SourceUnavailable(format!("download of {} failed: {}", track.url, e))
                    })?;
                    writer.write(&chunk).await?;
                }

                writer.finish().await?.ok_or_else(|| {
                    Error::SourceUnavailable(format!("download of {} was empty", track.url))
                })
            }
            Err(Error::CacheWriteFailed(_)) if self.cache.is_writing(&key) => {
                debug!("Another download of {} in progress, waiting for commit", track.title);
                self.wait_for_commit(&key).await
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_for_commit(&self, key: &str) -> Result<PathBuf> {
        for remaining in (0..COMMIT_POLL_ATTEMPTS).rev() {
            tokio::time::sleep(COMMIT_POLL_INTERVAL).await;
            if let Some(path) = self.cache.lookup(key).await? {
                return Ok(path);
            }
            debug!("Cache commit for {} pending ({} polls left)", key, remaining);
        }
        Err(Error::CacheWriteFailed(format!(
            "no committed file for {} after {} polls",
            key, COMMIT_POLL_ATTEMPTS
        )))
    }

    async fn resolve_upload(
        &self,
        track: &TrackMetadata,
        seek: u64,
        end: u64,
    ) -> Result<SourceDescriptor> {
        let key = upload_cache_key(&track.url);

        if let Some(path) = self.cache.lookup(&key).await? {
            return Ok(SourceDescriptor::new(SourceInput::File(path))
                .seek(seek)
                .until(end));
        }

        let descriptor = SourceDescriptor::new(SourceInput::Url(track.url.clone()))
            .seek(seek)
            .until(end);

        // Only a run from the very start yields a complete copy
        if seek > 0 {
            return Ok(descriptor);
        }

        match self.cache.begin_write(&key).await {
            Ok((writer, pending)) => {
                let title = track.title.clone();
                tokio::spawn(async move {
                    match pending.wait().await {
                        Ok(Some(path)) => info!("Cached upload {} at {}", title, path.display()),
                        Ok(None) => debug!("Upload {} was not cached", title),
                        Err(e) => warn!("Caching upload {} failed: {}", title, e),
                    }
                });
                Ok(descriptor.caching_into(writer))
            }
            Err(e) => {
                debug!("Not caching upload {}: {}", track.title, e);
                Ok(descriptor)
            }
        }
    }
}
