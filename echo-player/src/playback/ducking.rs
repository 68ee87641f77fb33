//! Voice-activity ducking
//!
//! Tracks who is speaking in the session's channel. Volume changes only on
//! transitions between nobody speaking and somebody speaking.

use std::collections::HashSet;

/// Volume change implied by a speaking event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuckTransition {
    /// First speaker started: apply the duck target
    Duck,
    /// Last speaker stopped: restore base volume
    Restore,
}

#[derive(Debug, Clone)]
pub struct Ducking {
    enabled: bool,
    target: u8,
    speaking: HashSet<String>,
}

impl Ducking {
    pub fn new(enabled: bool, target: u8) -> Self {
        Self {
            enabled,
            target,
            speaking: HashSet::new(),
        }
    }

    pub fn configure(&mut self, enabled: bool, target: u8) {
        self.enabled = enabled;
        self.target = target;
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn speaking_count(&self) -> usize {
        self.speaking.len()
    }

    /// Whether playback is currently ducked
    pub fn is_ducked(&self) -> bool {
        self.enabled && !self.speaking.is_empty()
    }

    pub fn speaking_start(&mut self, user_id: &str) -> Option<DuckTransition> {
        let was_empty = self.speaking.is_empty();
        self.speaking.insert(user_id.to_string());
        (self.enabled && was_empty).then_some(DuckTransition::Duck)
    }

    pub fn speaking_end(&mut self, user_id: &str) -> Option<DuckTransition> {
        let removed = self.speaking.remove(user_id);
        (self.enabled && removed && self.speaking.is_empty()).then_some(DuckTransition::Restore)
    }

    /// Volume the live resource should have given `base`
    pub fn effective_volume(&self, base: u8) -> u8 {
        if self.is_ducked() {
            self.target
        } else {
            base
        }
    }

    /// Forget all speakers (session ended)
    pub fn reset(&mut self) {
        self.speaking.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_only_at_empty_boundary() {
        let mut ducking = Ducking::new(true, 20);

        assert_eq!(ducking.speaking_start("a"), Some(DuckTransition::Duck));
        assert_eq!(ducking.speaking_start("b"), None);
        assert_eq!(ducking.effective_volume(80), 20);

        assert_eq!(ducking.speaking_end("a"), None);
        assert_eq!(ducking.speaking_end("b"), Some(DuckTransition::Restore));
        assert_eq!(ducking.effective_volume(80), 80);
    }

    #[test]
    fn test_unknown_speaker_end_is_ignored() {
        let mut ducking = Ducking::new(true, 20);
        assert_eq!(ducking.speaking_end("ghost"), None);
    }

    #[test]
    fn test_disabled_never_ducks() {
        let mut ducking = Ducking::new(false, 20);
        assert_eq!(ducking.speaking_start("a"), None);
        assert!(!ducking.is_ducked());
        assert_eq!(ducking.effective_volume(70), 70);
    }
}
