//! Shared per-player state
//!
//! Read by timer tasks without taking the engine's operation gate, so timers
//! can check the current transport state before acting.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::broadcast;
use tracing::debug;

use super::events::PlayerEvent;
use super::types::TransportState;

const EVENT_CAPACITY: usize = 100;

pub struct SharedState {
    transport: AtomicU8,
    event_tx: broadcast::Sender<PlayerEvent>,
}

impl SharedState {
    pub fn new(initial: TransportState) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport: AtomicU8::new(encode(initial)),
            event_tx,
        }
    }

    pub fn transport(&self) -> TransportState {
        decode(self.transport.load(Ordering::Acquire))
    }

    /// Store `new`, emitting `StateChanged` when it differs
    pub fn set_transport(&self, new: TransportState) {
        let old = decode(self.transport.swap(encode(new), Ordering::AcqRel));
        if old != new {
            debug!("Transport {} -> {}", old, new);
            self.broadcast_event(PlayerEvent::StateChanged { old, new });
        }
    }

    /// Broadcast to subscribers; no subscribers is fine
    pub fn broadcast_event(&self, event: PlayerEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }
}

fn encode(state: TransportState) -> u8 {
    match state {
        TransportState::Playing => 0,
        TransportState::Paused => 1,
        TransportState::Idle => 2,
    }
}

fn decode(raw: u8) -> TransportState {
    match raw {
        0 => TransportState::Playing,
        1 => TransportState::Paused,
        _ => TransportState::Idle,
    }
}
