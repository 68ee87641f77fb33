//! Position clock
//!
//! Whole seconds into the current track, ticking at 1 Hz while the player is
//! playing. Stopping the ticker freezes the value; only an explicit set resets it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::state::SharedState;
use super::types::TransportState;
use crate::config::POSITION_TICK;

pub struct PositionClock {
    seconds: Arc<AtomicU64>,
    ticker: Option<JoinHandle<()>>,
}

impl PositionClock {
    pub fn new() -> Self {
        Self {
            seconds: Arc::new(AtomicU64::new(0)),
            ticker: None,
        }
    }

    pub fn get(&self) -> u64 {
        self.seconds.load(Ordering::Acquire)
    }

    pub fn set(&self, seconds: u64) {
        self.seconds.store(seconds, Ordering::Release);
    }

    /// Read-only view for timer tasks
    pub fn reader(&self) -> ClockReader {
        ClockReader(Arc::clone(&self.seconds))
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// (Re)start ticking; each tick only counts while `state` is playing
    pub fn start(&mut self, state: Arc<SharedState>) {
        self.stop();

        let seconds = Arc::clone(&self.seconds);
        self.ticker = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + POSITION_TICK, POSITION_TICK);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if state.transport() == TransportState::Playing {
                    seconds.fetch_add(1, Ordering::AcqRel);
                }
            }
        }));
    }

    /// Stop ticking; the current value is kept
    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Shared read access to a [`PositionClock`]
#[derive(Clone)]
pub struct ClockReader(Arc<AtomicU64>);

impl ClockReader {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for PositionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PositionClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_only_while_playing() {
        let state = Arc::new(SharedState::new(TransportState::Playing));
        let mut clock = PositionClock::new();
        clock.start(Arc::clone(&state));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(clock.get(), 3);

        state.set_transport(TransportState::Paused);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(clock.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_freezes_and_set_resets() {
        let state = Arc::new(SharedState::new(TransportState::Playing));
        let mut clock = PositionClock::new();
        clock.start(state);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        clock.stop();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(clock.get(), 2);
        assert!(!clock.is_running());

        clock.set(0);
        assert_eq!(clock.get(), 0);
    }
}
