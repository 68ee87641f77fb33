//! Playback Engine
//!
//! One [`Player`] per guild. Owns the queue, transport state, position clock,
//! loop mode and ducking state, and drives the source resolver, transcoder and
//! voice session.
//!
//! **Serialization:** every mutating operation runs under a single async mutex
//! (`core`), so two callers can never interleave queue or cursor mutations
//! across suspension points. Timer tasks and the voice event loop go through
//! the same gate and re-check transport state once inside.
//!
//! **Teardown:** [`Player::disconnect`] is the only hard-cancellation path. It
//! is idempotent and clears every timer (position clock, progress refresh,
//! idle disconnect) and the voice event loop.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::clock::PositionClock;
use super::ducking::{DuckTransition, Ducking};
use super::events::PlayerEvent;
use super::queue::Queue;
use super::source::SourceResolver;
use super::state::SharedState;
use super::types::{LoopMode, QueuedTrack, TransportState};
use crate::cache::FileCache;
use crate::config::{PROGRESS_INTERVAL, VOLUME_DEFAULT, VOLUME_MAX};
use crate::error::{Error, Result};
use crate::provider::MetadataProvider;
use crate::settings::{fetch_or_default, GuildSettingsStore};
use crate::transcode::{OutcomeWatch, StreamOutcome, Transcode};
use crate::voice::{AudioHandle, VoiceAdapter, VoiceConnection, VoiceEvent};

/// Collaborators shared by every player in the process
#[derive(Clone)]
pub struct PlayerContext {
    pub cache: Arc<FileCache>,
    pub transcoder: Arc<dyn Transcode>,
    pub provider: Arc<dyn MetadataProvider>,
    pub voice: Arc<dyn VoiceAdapter>,
    pub settings: Arc<dyn GuildSettingsStore>,
}

/// Point-in-time view of a player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub state: TransportState,
    pub position: usize,
    pub queue_size: usize,
    pub position_seconds: u64,
    pub current: Option<QueuedTrack>,
    pub loop_mode: LoopMode,
    pub volume: u8,
    pub ducked: bool,
    pub connected: bool,
}

struct Session {
    connection: Box<dyn VoiceConnection>,
    channel_id: String,
    events_task: Option<JoinHandle<()>>,
}

struct ActiveAudio {
    handle: Box<dyn AudioHandle>,
    stream_id: u64,
    outcome: OutcomeWatch,
    entry_id: Uuid,
}

struct PlayerCore {
    queue: Queue,
    loop_mode: LoopMode,
    clock: PositionClock,
    session: Option<Session>,
    audio: Option<ActiveAudio>,
    /// URL of the track the clock belongs to
    clock_url: Option<String>,
    /// Volume set explicitly; survives reconnects
    volume: Option<u8>,
    default_volume: u8,
    ducking: Ducking,
    idle_timer: Option<JoinHandle<()>>,
    progress_timer: Option<JoinHandle<()>>,
}

impl PlayerCore {
    fn base_volume(&self) -> u8 {
        self.volume.unwrap_or(self.default_volume)
    }

    fn stop_audio(&mut self) {
        if let Some(audio) = self.audio.take() {
            audio.handle.stop();
        }
    }

    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }

    fn cancel_progress_timer(&mut self) {
        if let Some(timer) = self.progress_timer.take() {
            timer.abort();
        }
    }

    /// Push the effective volume to the live resource
    fn apply_volume(&self) -> u8 {
        let level = self.ducking.effective_volume(self.base_volume());
        if let Some(audio) = &self.audio {
            audio.handle.set_volume(f32::from(level) / f32::from(VOLUME_MAX));
        }
        level
    }
}

impl Drop for PlayerCore {
    fn drop(&mut self) {
        self.cancel_idle_timer();
        self.cancel_progress_timer();
        if let Some(mut session) = self.session.take() {
            if let Some(task) = session.events_task.take() {
                task.abort();
            }
            session.connection.destroy();
        }
    }
}

/// Per-guild playback engine
pub struct Player {
    guild_id: String,
    ctx: PlayerContext,
    resolver: SourceResolver,
    shared: Arc<SharedState>,
    core: Mutex<PlayerCore>,
    me: Weak<Player>,
}

impl Player {
    /// New player: paused, empty queue, not connected
    pub fn new(guild_id: impl Into<String>, ctx: PlayerContext) -> Arc<Self> {
        let resolver = SourceResolver::new(Arc::clone(&ctx.cache), Arc::clone(&ctx.provider));

        Arc::new_cyclic(|me| Self {
            guild_id: guild_id.into(),
            ctx,
            resolver,
            shared: Arc::new(SharedState::new(TransportState::Paused)),
            core: Mutex::new(PlayerCore {
                queue: Queue::new(),
                loop_mode: LoopMode::Off,
                clock: PositionClock::new(),
                session: None,
                audio: None,
                clock_url: None,
                volume: None,
                default_volume: VOLUME_DEFAULT,
                ducking: Ducking::new(false, 0),
                idle_timer: None,
                progress_timer: None,
            }),
            me: me.clone(),
        })
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn state(&self) -> TransportState {
        self.shared.transport()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.subscribe_events()
    }

    // ========================================
    // Voice session
    // ========================================

    /// Join `channel_id`; transport state is unchanged
    pub async fn connect(&self, channel_id: &str) -> Result<()> {
        let mut core = self.core.lock().await;

        if let Some(session) = &core.session {
            if session.channel_id == channel_id {
                return Ok(());
            }
        }
        self.disconnect_locked(&mut core);

        let settings = fetch_or_default(self.ctx.settings.as_ref(), &self.guild_id).await;
        core.default_volume = settings.default_volume;
        core.ducking.configure(settings.duck_enabled, settings.duck_target);

        let session = self.ctx.voice.connect(&self.guild_id, channel_id).await?;
        let mut events = session.events;

        let weak = self.me.clone();
        let events_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(player) = weak.upgrade() else {
                    break;
                };
                player.handle_voice_event(event).await;
            }
        });

        core.session = Some(Session {
            connection: session.connection,
            channel_id: channel_id.to_string(),
            events_task: Some(events_task),
        });

        info!(guild = %self.guild_id, channel = %channel_id, "Connected to voice channel");
        Ok(())
    }

    /// Tear down pipeline and voice session; safe to call repeatedly
    pub async fn disconnect(&self) {
        let mut core = self.core.lock().await;
        self.disconnect_locked(&mut core);
    }

    fn disconnect_locked(&self, core: &mut PlayerCore) {
        if self.shared.transport() == TransportState::Playing {
            self.shared.set_transport(TransportState::Paused);
        }
        if core.loop_mode == LoopMode::Track {
            core.loop_mode = LoopMode::Off;
        }

        core.stop_audio();
        core.clock.stop();
        core.cancel_progress_timer();
        core.cancel_idle_timer();
        core.ducking.reset();

        if let Some(mut session) = core.session.take() {
            if let Some(task) = session.events_task.take() {
                task.abort();
            }
            session.connection.destroy();
            info!(guild = %self.guild_id, "Disconnected from voice channel");
            self.shared.broadcast_event(PlayerEvent::Disconnected);
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.core.lock().await.session.is_some()
    }

    pub async fn channel_id(&self) -> Option<String> {
        let core = self.core.lock().await;
        core.session.as_ref().map(|s| s.channel_id.clone())
    }

    // ========================================
    // Transport
    // ========================================

    /// Start or resume playback of the current track
    pub async fn play(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        self.play_locked(&mut core).await
    }

    async fn play_locked(&self, core: &mut PlayerCore) -> Result<()> {
        if core.queue.current().is_none() {
            return Err(Error::QueueEmpty);
        }
        if core.session.is_none() {
            return Err(Error::NotConnected);
        }

        core.cancel_idle_timer();

        // Resume the paused pipeline of the same entry
        if self.shared.transport() == TransportState::Paused {
            let current_entry = core.queue.current().map(|t| t.entry_id);
            if let Some(audio) = &core.audio {
                if Some(audio.entry_id) == current_entry {
                    audio.handle.resume();
                    self.mark_playing(core);
                    debug!(guild = %self.guild_id, "Resumed playback");
                    return Ok(());
                }
            }
        }

        loop {
            let Some(track) = core.queue.current().cloned() else {
                self.settle_idle(core).await;
                return Ok(());
            };

            let same_url = core.clock_url.as_deref() == Some(track.url());
            let position = if same_url && !track.metadata.is_live {
                core.clock.get().min(track.metadata.length_seconds)
            } else {
                0
            };

            match self.start_pipeline(core, &track, position).await {
                Ok(()) => {
                    core.clock_url = Some(track.url().to_string());
                    core.clock.set(position);
                    self.mark_playing(core);
                    self.shared.broadcast_event(PlayerEvent::TrackStarted {
                        entry_id: track.entry_id,
                        title: track.metadata.title.clone(),
                        position_seconds: position,
                    });
                    info!(guild = %self.guild_id, "Playing {}", track.metadata.display_name());
                    return Ok(());
                }
                Err(e) if e.is_source_failure() => {
                    error!(
                        guild = %self.guild_id,
                        "Error playing {}, skipping: {}",
                        track.metadata.display_name(),
                        e
                    );
                    self.shared.broadcast_event(PlayerEvent::TrackFailed {
                        entry_id: track.entry_id,
                        title: track.metadata.title.clone(),
                        reason: e.to_string(),
                    });

                    if !core.queue.can_go_forward(1) {
                        core.queue.finish();
                        self.emit_queue_changed(core);
                        self.settle_idle(core).await;
                        return Ok(());
                    }
                    core.queue.advance(1)?;
                    core.clock.set(0);
                    self.emit_queue_changed(core);
                }
                Err(e) => {
                    error!(
                        guild = %self.guild_id,
                        "Failed to start {}: {}",
                        track.metadata.display_name(),
                        e
                    );
                    self.halt(core);
                    return Err(e);
                }
            }
        }
    }

    /// Replace the active pipeline with one for `track` at `position` seconds
    async fn start_pipeline(
        &self,
        core: &mut PlayerCore,
        track: &QueuedTrack,
        position: u64,
    ) -> Result<()> {
        core.stop_audio();
        core.cancel_progress_timer();

        let seek = track.metadata.offset_seconds + position;
        let descriptor = self.resolver.resolve(&track.metadata, seek).await?;
        let stream = self.ctx.transcoder.open(descriptor).await?;
        let stream_id = stream.id();
        let outcome = stream.outcome();

        let session = core.session.as_mut().ok_or(Error::NotConnected)?;
        let handle = session.connection.attach(stream)?;

        core.audio = Some(ActiveAudio {
            handle,
            stream_id,
            outcome,
            entry_id: track.entry_id,
        });
        core.apply_volume();

        Ok(())
    }

    /// Pipeline is gone: freeze the clock and fall back to paused
    fn halt(&self, core: &mut PlayerCore) {
        core.stop_audio();
        core.clock.stop();
        core.cancel_progress_timer();
        if self.shared.transport() == TransportState::Playing {
            self.shared.set_transport(TransportState::Paused);
        }
    }

    fn mark_playing(&self, core: &mut PlayerCore) {
        self.shared.set_transport(TransportState::Playing);
        core.clock.start(Arc::clone(&self.shared));
        self.start_progress_timer(core);
    }

    /// Pause the playing track, freezing the clock
    pub async fn pause(&self) -> Result<()> {
        let mut core = self.core.lock().await;

        if self.shared.transport() != TransportState::Playing {
            return Err(Error::InvalidState("not currently playing".to_string()));
        }

        if let Some(audio) = &core.audio {
            audio.handle.pause();
        }
        core.clock.stop();
        core.cancel_progress_timer();
        self.shared.set_transport(TransportState::Paused);
        debug!(guild = %self.guild_id, "Paused at {}s", core.clock.get());
        Ok(())
    }

    /// Seek to `target` seconds into the current track; always resumes playback
    pub async fn seek(&self, target: u64) -> Result<()> {
        let mut core = self.core.lock().await;
        self.seek_locked(&mut core, target).await
    }

    /// Seek relative to the current position
    pub async fn forward_seek(&self, delta: u64) -> Result<()> {
        let mut core = self.core.lock().await;
        let target = core.clock.get().saturating_add(delta);
        self.seek_locked(&mut core, target).await
    }

    async fn seek_locked(&self, core: &mut PlayerCore, target: u64) -> Result<()> {
        let track = core
            .queue
            .current()
            .cloned()
            .ok_or_else(|| Error::NoTrackToNavigateTo("no song currently playing".to_string()))?;

        if track.metadata.is_live {
            return Err(Error::InvalidState("can't seek in a livestream".to_string()));
        }
        if target > track.metadata.length_seconds {
            return Err(Error::SeekOutOfRange {
                position: target,
                length: track.metadata.length_seconds,
            });
        }
        if core.session.is_none() {
            return Err(Error::NotConnected);
        }

        core.cancel_idle_timer();

        match self.start_pipeline(core, &track, target).await {
            Ok(()) => {
                core.clock_url = Some(track.url().to_string());
                core.clock.set(target);
                self.mark_playing(core);
                self.shared.broadcast_event(PlayerEvent::TrackStarted {
                    entry_id: track.entry_id,
                    title: track.metadata.title.clone(),
                    position_seconds: target,
                });
                debug!(guild = %self.guild_id, "Seeked to {}s", target);
                Ok(())
            }
            Err(e) => {
                self.halt(core);
                core.clock_url = Some(track.url().to_string());
                core.clock.set(target);
                Err(e)
            }
        }
    }

    /// Advance `n` tracks
    pub async fn forward(&self, n: usize) -> Result<()> {
        let mut core = self.core.lock().await;
        self.forward_locked(&mut core, n).await
    }

    async fn forward_locked(&self, core: &mut PlayerCore, n: usize) -> Result<()> {
        if !core.queue.can_go_forward(n) {
            return Err(Error::NoTrackToNavigateTo(
                "no tracks in queue to forward to".to_string(),
            ));
        }

        let previous = core.queue.position();
        core.queue.advance(n)?;
        self.after_cursor_move(core, previous).await
    }

    /// Step back one track
    pub async fn back(&self) -> Result<()> {
        let mut core = self.core.lock().await;

        if !core.queue.can_go_back() {
            return Err(Error::NoTrackToNavigateTo("no songs to go back to".to_string()));
        }

        let previous = core.queue.position();
        core.queue.back()?;
        self.after_cursor_move(&mut core, previous).await
    }

    /// Shared tail of forward/back: reset clock, then play, stay paused or go idle
    ///
    /// A failed play restores the cursor to `previous`.
    async fn after_cursor_move(&self, core: &mut PlayerCore, previous: usize) -> Result<()> {
        core.clock.stop();
        core.clock.set(0);
        core.clock_url = None;
        self.emit_queue_changed(core);

        if core.queue.current().is_none() {
            self.settle_idle(core).await;
            return Ok(());
        }

        if self.shared.transport() == TransportState::Paused {
            core.stop_audio();
            return Ok(());
        }

        if let Err(e) = self.play_locked(core).await {
            core.queue.set_position(previous);
            self.emit_queue_changed(core);
            return Err(e);
        }
        Ok(())
    }

    /// Automatic advance after a track: next track, or idle when none is left
    async fn advance_or_finish(&self, core: &mut PlayerCore) -> Result<()> {
        if core.queue.can_go_forward(1) {
            return self.forward_locked(core, 1).await;
        }

        core.queue.finish();
        core.clock.stop();
        core.clock.set(0);
        core.clock_url = None;
        self.emit_queue_changed(core);
        self.settle_idle(core).await;
        Ok(())
    }

    /// No track left: stop audio, go idle and arm the idle-disconnect timer
    async fn settle_idle(&self, core: &mut PlayerCore) {
        core.stop_audio();
        core.clock.stop();
        core.clock.set(0);
        core.clock_url = None;
        core.cancel_progress_timer();
        self.shared.set_transport(TransportState::Idle);

        let settings = fetch_or_default(self.ctx.settings.as_ref(), &self.guild_id).await;
        self.arm_idle_timer(core, settings.idle_disconnect_seconds);
    }

    fn arm_idle_timer(&self, core: &mut PlayerCore, seconds: u64) {
        core.cancel_idle_timer();
        if seconds == 0 || core.session.is_none() {
            return;
        }

        let weak = self.me.clone();
        core.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            let Some(player) = weak.upgrade() else {
                return;
            };
            let mut core = player.core.lock().await;
            // Detach: this task is finishing on its own
            core.idle_timer.take();
            if player.shared.transport() == TransportState::Idle {
                info!(guild = %player.guild_id, "Idle for {}s, disconnecting", seconds);
                player.disconnect_locked(&mut core);
            }
        }));
    }

    fn start_progress_timer(&self, core: &mut PlayerCore) {
        core.cancel_progress_timer();
        let Some(track) = core.queue.current() else {
            return;
        };

        let entry_id = track.entry_id;
        let length_seconds = track.metadata.length_seconds;
        let clock = core.clock.reader();
        let shared = Arc::clone(&self.shared);

        core.progress_timer = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
            loop {
                ticks.tick().await;
                if shared.transport() == TransportState::Playing {
                    shared.broadcast_event(PlayerEvent::Progress {
                        entry_id,
                        position_seconds: clock.get(),
                        length_seconds,
                    });
                }
            }
        }));
    }

    /// Disconnect, then clear the whole queue and reset the cursor
    pub async fn stop(&self) -> Result<()> {
        let mut core = self.core.lock().await;

        self.disconnect_locked(&mut core);
        core.queue.clear_all();
        core.clock.set(0);
        core.clock_url = None;
        self.shared.set_transport(TransportState::Idle);
        self.emit_queue_changed(&core);
        Ok(())
    }

    // ========================================
    // Queue
    // ========================================

    /// Add one track; returns the index it landed at
    pub async fn add(&self, track: QueuedTrack, front: bool) -> usize {
        let mut core = self.core.lock().await;
        let at = core.queue.add(track, front);
        self.emit_queue_changed(&core);
        at
    }

    /// Add tracks keeping their order
    pub async fn add_all(&self, tracks: Vec<QueuedTrack>, front: bool) -> usize {
        let mut core = self.core.lock().await;
        let added = core.queue.add_all(tracks, front);
        self.emit_queue_changed(&core);
        added
    }

    /// Keep only the current track
    pub async fn clear(&self) {
        let mut core = self.core.lock().await;
        core.queue.clear_keep_current();
        self.emit_queue_changed(&core);
    }

    pub async fn shuffle(&self) {
        let mut core = self.core.lock().await;
        core.queue.shuffle_upcoming(&mut rand::thread_rng());
        self.emit_queue_changed(&core);
    }

    /// Move an upcoming track; indices are relative to the cursor
    pub async fn move_track(&self, from: usize, to: usize) -> Result<QueuedTrack> {
        let mut core = self.core.lock().await;
        let moved = core.queue.move_track(from, to)?.clone();
        self.emit_queue_changed(&core);
        Ok(moved)
    }

    /// Remove `amount` upcoming tracks starting at `index` (1 = next)
    pub async fn remove(&self, index: usize, amount: usize) -> Result<Vec<QueuedTrack>> {
        let mut core = self.core.lock().await;
        let removed = core.queue.remove_upcoming(index, amount)?;
        self.emit_queue_changed(&core);
        Ok(removed)
    }

    /// Remove the current track, moving playback on to the next one
    pub async fn remove_current(&self) -> Result<Option<QueuedTrack>> {
        let mut core = self.core.lock().await;
        let Some(removed) = core.queue.remove_current() else {
            return Ok(None);
        };

        core.stop_audio();
        core.clock.stop();
        core.clock.set(0);
        core.clock_url = None;
        self.emit_queue_changed(&core);

        match self.shared.transport() {
            TransportState::Playing if core.queue.current().is_some() => {
                self.play_locked(&mut core).await?;
            }
            TransportState::Playing => self.settle_idle(&mut core).await,
            _ => {}
        }

        Ok(Some(removed))
    }

    pub async fn current(&self) -> Option<QueuedTrack> {
        self.core.lock().await.queue.current().cloned()
    }

    pub async fn upcoming(&self) -> Vec<QueuedTrack> {
        self.core.lock().await.queue.upcoming().to_vec()
    }

    pub async fn queue_size(&self) -> usize {
        self.core.lock().await.queue.upcoming_len()
    }

    pub async fn is_queue_empty(&self) -> bool {
        self.queue_size().await == 0
    }

    pub async fn queue_position(&self) -> usize {
        self.core.lock().await.queue.position()
    }

    pub async fn can_go_forward(&self, n: usize) -> bool {
        self.core.lock().await.queue.can_go_forward(n)
    }

    pub async fn can_go_back(&self) -> bool {
        self.core.lock().await.queue.can_go_back()
    }

    pub async fn position_seconds(&self) -> u64 {
        self.core.lock().await.clock.get()
    }

    fn emit_queue_changed(&self, core: &PlayerCore) {
        self.shared.broadcast_event(PlayerEvent::QueueChanged {
            length: core.queue.len(),
            position: core.queue.position(),
        });
    }

    // ========================================
    // Loop mode
    // ========================================

    pub async fn loop_mode(&self) -> LoopMode {
        self.core.lock().await.loop_mode
    }

    pub async fn set_loop_mode(&self, mode: LoopMode) {
        self.core.lock().await.loop_mode = mode;
    }

    /// Turn track looping on or off; turning it on clears queue looping
    pub async fn set_loop_track(&self, enabled: bool) {
        let mut core = self.core.lock().await;
        if enabled {
            core.loop_mode = LoopMode::Track;
        } else if core.loop_mode == LoopMode::Track {
            core.loop_mode = LoopMode::Off;
        }
    }

    /// Turn queue looping on or off; turning it on clears track looping
    pub async fn set_loop_queue(&self, enabled: bool) {
        let mut core = self.core.lock().await;
        if enabled {
            core.loop_mode = LoopMode::Queue;
        } else if core.loop_mode == LoopMode::Queue {
            core.loop_mode = LoopMode::Off;
        }
    }

    // ========================================
    // Volume
    // ========================================

    /// Set the base volume (0-100)
    ///
    /// While ducked the new level is stored and applied once ducking lifts.
    pub async fn set_volume(&self, level: u8) -> Result<()> {
        if level > VOLUME_MAX {
            return Err(Error::InvalidInput(format!(
                "volume must be between 0 and {}",
                VOLUME_MAX
            )));
        }

        let mut core = self.core.lock().await;
        core.volume = Some(level);
        let ducked = core.ducking.is_ducked();
        if !ducked {
            core.apply_volume();
        }
        self.shared
            .broadcast_event(PlayerEvent::VolumeChanged { level, ducked });
        Ok(())
    }

    /// Base volume (explicit level, else the guild default)
    pub async fn volume(&self) -> u8 {
        self.core.lock().await.base_volume()
    }

    pub async fn is_ducked(&self) -> bool {
        self.core.lock().await.ducking.is_ducked()
    }

    pub async fn snapshot(&self) -> PlayerSnapshot {
        let core = self.core.lock().await;
        PlayerSnapshot {
            state: self.shared.transport(),
            position: core.queue.position(),
            queue_size: core.queue.upcoming_len(),
            position_seconds: core.clock.get(),
            current: core.queue.current().cloned(),
            loop_mode: core.loop_mode,
            volume: core.base_volume(),
            ducked: core.ducking.is_ducked(),
            connected: core.session.is_some(),
        }
    }

    // ========================================
    // Voice events
    // ========================================

    async fn handle_voice_event(&self, event: VoiceEvent) {
        let mut core = self.core.lock().await;

        match event {
            VoiceEvent::Disconnected => {
                // Detach the event loop running this handler before teardown
                if let Some(session) = core.session.as_mut() {
                    session.events_task.take();
                }
                self.disconnect_locked(&mut core);
            }
            VoiceEvent::TrackEnded { stream_id } => {
                self.handle_track_ended(&mut core, stream_id).await;
            }
            VoiceEvent::SpeakingStart(user) => {
                if core.ducking.speaking_start(&user) == Some(DuckTransition::Duck) {
                    let level = core.apply_volume();
                    debug!(guild = %self.guild_id, "Ducking to {}", level);
                    self.shared
                        .broadcast_event(PlayerEvent::VolumeChanged { level, ducked: true });
                }
            }
            VoiceEvent::SpeakingEnd(user) => {
                if core.ducking.speaking_end(&user) == Some(DuckTransition::Restore) {
                    let level = core.apply_volume();
                    debug!(guild = %self.guild_id, "Restoring volume to {}", level);
                    self.shared
                        .broadcast_event(PlayerEvent::VolumeChanged { level, ducked: false });
                }
            }
        }
    }

    async fn handle_track_ended(&self, core: &mut PlayerCore, stream_id: u64) {
        let Some(audio) = core.audio.as_ref() else {
            return;
        };
        if audio.stream_id != stream_id || self.shared.transport() != TransportState::Playing {
            debug!(guild = %self.guild_id, "Ignoring stale track end for stream {}", stream_id);
            return;
        }

        let failure = match audio.outcome.current() {
            Some(StreamOutcome::Failed(reason)) => Some(reason),
            _ => None,
        };
        core.audio = None;

        if let Some(reason) = failure {
            warn!(guild = %self.guild_id, "Stream ended with error: {}", reason);
            if let Some(track) = core.queue.current() {
                self.shared.broadcast_event(PlayerEvent::TrackFailed {
                    entry_id: track.entry_id,
                    title: track.metadata.title.clone(),
                    reason,
                });
            }
        } else if core.loop_mode == LoopMode::Track {
            if let Err(e) = self.seek_locked(core, 0).await {
                warn!(guild = %self.guild_id, "Failed to loop track: {}", e);
            }
            return;
        } else if core.loop_mode == LoopMode::Queue {
            if let Some(track) = core.queue.current() {
                let copy = track.requeued();
                core.queue.add(copy, false);
            }
        }

        match self.advance_or_finish(core).await {
            Ok(()) => self.announce_next(core).await,
            Err(e) => warn!(guild = %self.guild_id, "Failed to advance after track end: {}", e),
        }
    }

    async fn announce_next(&self, core: &PlayerCore) {
        if self.shared.transport() != TransportState::Playing {
            return;
        }
        let Some(track) = core.queue.current() else {
            return;
        };

        let settings = fetch_or_default(self.ctx.settings.as_ref(), &self.guild_id).await;
        if settings.auto_announce_next_track {
            self.shared.broadcast_event(PlayerEvent::Announce {
                entry_id: track.entry_id,
                title: track.metadata.title.clone(),
                channel_id: track.added_in_channel_id.clone(),
            });
        }
    }
}
