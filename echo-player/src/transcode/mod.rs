//! Transcoding Pipeline
//!
//! Turns a source (cached file or remote URL) into an Opus/WebM byte stream
//! through an external process, with optional seek, end bound and volume
//! filter. Output can be tee'd into a cache write concurrently with playback.

mod ffmpeg;
mod stream;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::cache::CacheWriter;
use crate::config::OPUS_OUTPUT_BITRATE_KBPS;
use crate::error::Result;

pub use ffmpeg::FfmpegTranscoder;
pub use stream::{AudioStream, OutcomeWatch, StreamOutcome};

/// Transcoder input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    File(PathBuf),
    Url(String),
}

impl SourceInput {
    fn as_arg(&self) -> String {
        match self {
            SourceInput::File(path) => path.to_string_lossy().to_string(),
            SourceInput::Url(url) => url.clone(),
        }
    }
}

/// What to transcode and how
pub struct SourceDescriptor {
    pub input: SourceInput,
    /// Input seek (`-ss`); zero is treated as absent
    pub seek_seconds: Option<u64>,
    /// Input end bound (`-to`); zero is treated as absent
    pub to_seconds: Option<u64>,
    /// Volume filter expression, `1` when absent
    pub volume_filter: Option<String>,
    /// Cache sink that receives a copy of the output
    pub cache_into: Option<CacheWriter>,
}

impl SourceDescriptor {
    pub fn new(input: SourceInput) -> Self {
        Self {
            input,
            seek_seconds: None,
            to_seconds: None,
            volume_filter: None,
            cache_into: None,
        }
    }

    pub fn seek(mut self, seconds: u64) -> Self {
        self.seek_seconds = Some(seconds);
        self
    }

    pub fn until(mut self, seconds: u64) -> Self {
        self.to_seconds = Some(seconds);
        self
    }

    pub fn caching_into(mut self, writer: CacheWriter) -> Self {
        self.cache_into = Some(writer);
        self
    }

    fn has_input_options(&self) -> bool {
        self.seek_seconds.unwrap_or(0) > 0 || self.to_seconds.unwrap_or(0) > 0
    }
}

impl std::fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("input", &self.input)
            .field("seek_seconds", &self.seek_seconds)
            .field("to_seconds", &self.to_seconds)
            .field("volume_filter", &self.volume_filter)
            .field("caching", &self.cache_into.is_some())
            .finish()
    }
}

/// Opens transcoded audio streams
#[async_trait]
pub trait Transcode: Send + Sync {
    /// Start transcoding `source`
    ///
    /// Fails with `SourceUnavailable` if the process errors before producing
    /// any output.
    async fn open(&self, source: SourceDescriptor) -> Result<AudioStream>;
}

/// Build the transcoder argument list for `source`
///
/// Remote URLs without explicit input options are read at native rate.
pub fn build_args(source: &SourceDescriptor) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

    if let Some(seek) = source.seek_seconds.filter(|s| *s > 0) {
        args.push("-ss".into());
        args.push(seek.to_string());
    }
    if let Some(to) = source.to_seconds.filter(|s| *s > 0) {
        args.push("-to".into());
        args.push(to.to_string());
    }
    if matches!(source.input, SourceInput::Url(_)) && !source.has_input_options() {
        args.push("-re".into());
    }

    args.push("-i".into());
    args.push(source.input.as_arg());

    args.extend(
        [
            "-vn",
            "-acodec",
            "libopus",
            "-f",
            "webm",
            "-b:a",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(format!("{}k", OPUS_OUTPUT_BITRATE_KBPS));
    args.push("-filter:a".into());
    args.push(format!(
        "volume={}",
        source.volume_filter.as_deref().unwrap_or("1")
    ));
    args.push("pipe:1".into());

    args
}
