//! Playback Engine
//!
//! Queue/cursor state machine, position clock, ducking, and the glue that
//! turns the current track into an attached audio stream.

mod clock;
mod ducking;
mod engine;
mod events;
mod queue;
mod source;
mod state;
mod types;

pub use clock::{ClockReader, PositionClock};
pub use ducking::{DuckTransition, Ducking};
pub use engine::{Player, PlayerContext, PlayerSnapshot};
pub use events::PlayerEvent;
pub use queue::Queue;
pub use source::{asset_cache_key, upload_cache_key, SourceResolver};
pub use state::SharedState;
pub use types::{LoopMode, PlaylistRef, QueuedTrack, SourceKind, TrackMetadata, TransportState};
