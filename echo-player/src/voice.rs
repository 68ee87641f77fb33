//! Voice Session Adapter contract
//!
//! The engine depends only on this boundary: connect to a channel, attach an
//! audio stream, control the playing resource, and receive session events.
//! Transport internals (keep-alives, encryption, reconnects) live entirely
//! behind an implementation of [`VoiceAdapter`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::transcode::AudioStream;

/// Events emitted by a voice session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// The session was closed from the transport side
    Disconnected,
    /// The attached stream with this id has played out
    TrackEnded { stream_id: u64 },
    SpeakingStart(String),
    SpeakingEnd(String),
}

/// Established session
pub struct VoiceSession {
    pub connection: Box<dyn VoiceConnection>,
    pub events: mpsc::UnboundedReceiver<VoiceEvent>,
}

/// Connects to voice channels
#[async_trait]
pub trait VoiceAdapter: Send + Sync {
    async fn connect(&self, guild_id: &str, channel_id: &str) -> Result<VoiceSession>;
}

/// Live connection to one voice channel
pub trait VoiceConnection: Send + Sync {
    /// Start playing `stream`, replacing whatever was attached before
    fn attach(&mut self, stream: AudioStream) -> Result<Box<dyn AudioHandle>>;

    /// Close the session; safe to call more than once
    fn destroy(&mut self);

    fn channel_id(&self) -> &str;
}

/// Control over the currently attached audio resource
pub trait AudioHandle: Send + Sync {
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    /// Linear gain in `0.0..=1.0`
    fn set_volume(&self, gain: f32);
}
