//! Test helpers for echo-player integration tests
//!
//! In-process stand-ins for every collaborator the engine talks to:
//! - FakeVoice: records attached streams and control calls, injects events
//! - FakeTranscoder: records descriptors, returns finished streams
//! - FakeProvider: serves canned search results and asset bytes
//! - StaticSettings: fixed guild settings

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use tempfile::TempDir;
use tokio::sync::mpsc;

use echo_player::cache::FileCache;
use echo_player::playback::{PlayerContext, QueuedTrack, SourceKind, TrackMetadata};
use echo_player::provider::{ByteStream, MetadataProvider};
use echo_player::settings::{GuildSettings, GuildSettingsStore};
use echo_player::transcode::{AudioStream, SourceDescriptor, SourceInput, Transcode};
use echo_player::voice::{AudioHandle, VoiceAdapter, VoiceConnection, VoiceEvent, VoiceSession};
use echo_player::{Error, Result};

// ========================================
// Voice
// ========================================

/// Control calls seen by the fake voice session
#[derive(Debug, Clone, Default)]
pub struct VoiceLog {
    pub connects: Vec<String>,
    pub attached: Vec<u64>,
    pub paused: usize,
    pub resumed: usize,
    pub stopped: usize,
    pub volumes: Vec<f32>,
    pub destroyed: usize,
}

#[derive(Default)]
pub struct FakeVoice {
    log: Arc<Mutex<VoiceLog>>,
    senders: Mutex<Vec<mpsc::UnboundedSender<VoiceEvent>>>,
}

impl FakeVoice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> VoiceLog {
        self.log.lock().unwrap().clone()
    }

    pub fn last_stream_id(&self) -> Option<u64> {
        self.log.lock().unwrap().attached.last().copied()
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.log.lock().unwrap().volumes.last().copied()
    }

    /// Deliver `event` on the most recent session
    pub fn send(&self, event: VoiceEvent) {
        let senders = self.senders.lock().unwrap();
        let sender = senders.last().expect("no voice session");
        sender.send(event).expect("session event loop gone");
    }
}

#[async_trait]
impl VoiceAdapter for FakeVoice {
    async fn connect(&self, _guild_id: &str, channel_id: &str) -> Result<VoiceSession> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        self.log.lock().unwrap().connects.push(channel_id.to_string());

        Ok(VoiceSession {
            connection: Box::new(FakeConnection {
                channel_id: channel_id.to_string(),
                log: Arc::clone(&self.log),
                streams: Vec::new(),
            }),
            events: rx,
        })
    }
}

struct FakeConnection {
    channel_id: String,
    log: Arc<Mutex<VoiceLog>>,
    /// Held so producers don't see the consumer go away
    streams: Vec<AudioStream>,
}

impl VoiceConnection for FakeConnection {
    fn attach(&mut self, stream: AudioStream) -> Result<Box<dyn AudioHandle>> {
        self.log.lock().unwrap().attached.push(stream.id());
        self.streams.push(stream);
        Ok(Box::new(FakeHandle {
            log: Arc::clone(&self.log),
        }))
    }

    fn destroy(&mut self) {
        self.streams.clear();
        self.log.lock().unwrap().destroyed += 1;
    }

    fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

struct FakeHandle {
    log: Arc<Mutex<VoiceLog>>,
}

impl AudioHandle for FakeHandle {
    fn pause(&self) {
        self.log.lock().unwrap().paused += 1;
    }

    fn resume(&self) {
        self.log.lock().unwrap().resumed += 1;
    }

    fn stop(&self) {
        self.log.lock().unwrap().stopped += 1;
    }

    fn set_volume(&self, gain: f32) {
        self.log.lock().unwrap().volumes.push(gain);
    }
}

// ========================================
// Transcoder
// ========================================

/// Descriptor fields seen by the fake transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedSource {
    pub input: SourceInput,
    pub seek_seconds: Option<u64>,
    pub to_seconds: Option<u64>,
    pub caching: bool,
}

#[derive(Default)]
pub struct FakeTranscoder {
    opened: Mutex<Vec<OpenedSource>>,
    failing: Mutex<HashSet<String>>,
    io_broken: Mutex<bool>,
}

impl FakeTranscoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every open whose URL input equals `url`
    pub fn fail_url(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Fail every open with an I/O error until switched back
    pub fn set_io_broken(&self, broken: bool) {
        *self.io_broken.lock().unwrap() = broken;
    }

    pub fn opened(&self) -> Vec<OpenedSource> {
        self.opened.lock().unwrap().clone()
    }

    pub fn last_opened(&self) -> Option<OpenedSource> {
        self.opened.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transcode for FakeTranscoder {
    async fn open(&self, source: SourceDescriptor) -> Result<AudioStream> {
        self.opened.lock().unwrap().push(OpenedSource {
            input: source.input.clone(),
            seek_seconds: source.seek_seconds,
            to_seconds: source.to_seconds,
            caching: source.cache_into.is_some(),
        });

        if *self.io_broken.lock().unwrap() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk unavailable",
            )));
        }

        if let SourceInput::Url(url) = &source.input {
            if self.failing.lock().unwrap().contains(url) {
                return Err(Error::SourceUnavailable(format!("{} refused", url)));
            }
        }

        Ok(AudioStream::from_chunks(vec![Bytes::from_static(b"opus")]))
    }
}

// ========================================
// Provider
// ========================================

#[derive(Default)]
pub struct FakeProvider {
    results: Mutex<Vec<TrackMetadata>>,
    broken: Mutex<HashSet<String>>,
    downloads: Mutex<HashMap<String, usize>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_results(&self, tracks: Vec<TrackMetadata>) {
        *self.results.lock().unwrap() = tracks;
    }

    /// Make downloads of `track_id` fail
    pub fn break_download(&self, track_id: &str) {
        self.broken.lock().unwrap().insert(track_id.to_string());
    }

    pub fn download_count(&self, track_id: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .get(track_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl MetadataProvider for FakeProvider {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<TrackMetadata>> {
        Ok(self.results.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn download(
        &self,
        track_id: &str,
        _bitrate_kbps: u32,
        _offset_seconds: u64,
    ) -> Result<ByteStream> {
        *self
            .downloads
            .lock()
            .unwrap()
            .entry(track_id.to_string())
            .or_default() += 1;

        if self.broken.lock().unwrap().contains(track_id) {
            return Err(Error::Provider(format!("asset {} unavailable", track_id)));
        }

        let body = format!("mp3 bytes for {}", track_id);
        Ok(Box::pin(stream::iter(vec![Ok(Bytes::from(body))])))
    }
}

// ========================================
// Settings
// ========================================

pub struct StaticSettings(pub GuildSettings);

#[async_trait]
impl GuildSettingsStore for StaticSettings {
    async fn fetch(&self, _guild_id: &str) -> Result<Option<GuildSettings>> {
        Ok(Some(self.0.clone()))
    }
}

// ========================================
// Fixtures
// ========================================

pub struct Harness {
    /// Keeps the database and cache directory alive
    pub dir: TempDir,
    pub cache: Arc<FileCache>,
    pub voice: Arc<FakeVoice>,
    pub transcoder: Arc<FakeTranscoder>,
    pub provider: Arc<FakeProvider>,
    pub ctx: PlayerContext,
}

/// Open a cache over a fresh temp directory and database
pub async fn open_cache(limit_bytes: u64) -> (TempDir, Arc<FileCache>) {
    let dir = TempDir::new().unwrap();
    let pool = echo_common::db::init_database(&dir.path().join("echo.db"))
        .await
        .unwrap();
    let cache = FileCache::open(dir.path().join("cache"), limit_bytes, pool)
        .await
        .unwrap();
    (dir, cache)
}

pub async fn harness() -> Harness {
    harness_with(GuildSettings::default()).await
}

pub async fn harness_with(settings: GuildSettings) -> Harness {
    let (dir, cache) = open_cache(1024 * 1024).await;
    let voice = FakeVoice::new();
    let transcoder = FakeTranscoder::new();
    let provider = FakeProvider::new();

    let ctx = PlayerContext {
        cache: Arc::clone(&cache),
        transcoder: transcoder.clone(),
        provider: provider.clone(),
        voice: voice.clone(),
        settings: Arc::new(StaticSettings(settings)),
    };

    Harness {
        dir,
        cache,
        voice,
        transcoder,
        provider,
        ctx,
    }
}

pub fn track(id: &str) -> TrackMetadata {
    TrackMetadata {
        url: id.to_string(),
        title: format!("Song {}", id),
        artist: "Artist".to_string(),
        length_seconds: 180,
        offset_seconds: 0,
        is_live: false,
        thumbnail_url: None,
        playlist: None,
        source: SourceKind::ProviderAsset,
    }
}

pub fn live(url: &str) -> TrackMetadata {
    TrackMetadata {
        is_live: true,
        length_seconds: 0,
        source: SourceKind::LiveStream,
        ..track(url)
    }
}

pub fn upload(url: &str) -> TrackMetadata {
    TrackMetadata {
        artist: "Uploaded file".to_string(),
        length_seconds: 0,
        source: SourceKind::UploadedFile,
        ..track(url)
    }
}

pub fn queued(metadata: TrackMetadata) -> QueuedTrack {
    QueuedTrack::new(metadata, "text-1", "user-1")
}

/// Poll `check` until it holds, failing after two seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}
