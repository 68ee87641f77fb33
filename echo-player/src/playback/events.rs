//! Player events
//!
//! Broadcast to any listener (now-playing display, announcer, logging).

use uuid::Uuid;

use super::types::TransportState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    StateChanged {
        old: TransportState,
        new: TransportState,
    },

    /// A pipeline was attached for this track
    TrackStarted {
        entry_id: Uuid,
        title: String,
        position_seconds: u64,
    },

    /// The track's source could not be played and was skipped
    TrackFailed {
        entry_id: Uuid,
        title: String,
        reason: String,
    },

    QueueChanged {
        length: usize,
        position: usize,
    },

    /// Periodic now-playing refresh while playing
    Progress {
        entry_id: Uuid,
        position_seconds: u64,
        length_seconds: u64,
    },

    /// Next track announcement after an automatic advance
    Announce {
        entry_id: Uuid,
        title: String,
        channel_id: String,
    },

    Disconnected,

    VolumeChanged {
        level: u8,
        ducked: bool,
    },
}
