//! Ordered track list with a play cursor
//!
//! `position` always indexes the current track, or sits one past the end once
//! the queue has played out. Every operation validates before it mutates.

use rand::seq::SliceRandom;
use rand::Rng;

use super::types::QueuedTrack;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Queue {
    tracks: Vec<QueuedTrack>,
    position: usize,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Total tracks, history included
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[QueuedTrack] {
        &self.tracks
    }

    pub fn current(&self) -> Option<&QueuedTrack> {
        self.tracks.get(self.position)
    }

    /// Tracks after the cursor
    pub fn upcoming(&self) -> &[QueuedTrack] {
        self.tracks.get(self.position + 1..).unwrap_or(&[])
    }

    pub fn upcoming_len(&self) -> usize {
        self.upcoming().len()
    }

    /// Add a track
    ///
    /// Playlist members always append. Otherwise `front` inserts right after
    /// the cursor. Returns the index the track landed at.
    pub fn add(&mut self, track: QueuedTrack, front: bool) -> usize {
        if front && !track.is_playlist_member() {
            let at = (self.position + 1).min(self.tracks.len());
            self.tracks.insert(at, track);
            at
        } else {
            self.tracks.push(track);
            self.tracks.len() - 1
        }
    }

    /// Add several tracks keeping their relative order
    ///
    /// With `front`, non-playlist tracks go right after the cursor in order.
    pub fn add_all(&mut self, tracks: impl IntoIterator<Item = QueuedTrack>, front: bool) -> usize {
        let mut next_front = (self.position + 1).min(self.tracks.len());
        let mut added = 0;
        for track in tracks {
            if front && !track.is_playlist_member() {
                self.tracks.insert(next_front, track);
                next_front += 1;
            } else {
                self.tracks.push(track);
            }
            added += 1;
        }
        added
    }

    /// Whether the track `n` places past the cursor exists
    pub fn can_go_forward(&self, n: usize) -> bool {
        n >= 1 && self.position + n < self.tracks.len()
    }

    pub fn can_go_back(&self) -> bool {
        self.position > 0
    }

    /// Move the cursor forward by `n`; the target track must exist
    pub fn advance(&mut self, n: usize) -> Result<()> {
        if !self.can_go_forward(n) {
            return Err(Error::NoTrackToNavigateTo(
                "no tracks in queue to forward to".to_string(),
            ));
        }
        self.position += n;
        Ok(())
    }

    /// Step past the last track: nothing is current afterwards
    pub fn finish(&mut self) {
        self.position = self.tracks.len();
    }

    pub fn back(&mut self) -> Result<()> {
        if !self.can_go_back() {
            return Err(Error::NoTrackToNavigateTo("no songs to go back to".to_string()));
        }
        self.position -= 1;
        Ok(())
    }

    /// Restore a cursor saved before a failed transition
    pub(crate) fn set_position(&mut self, position: usize) {
        self.position = position.min(self.tracks.len());
    }

    /// Randomly permute the upcoming tracks
    pub fn shuffle_upcoming<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let start = (self.position + 1).min(self.tracks.len());
        self.tracks[start..].shuffle(rng);
    }

    /// Move an upcoming track; indices count from the cursor (1 = next)
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<&QueuedTrack> {
        let upcoming = self.upcoming_len();
        if from < 1 || to < 1 || from > upcoming || to > upcoming {
            return Err(Error::InvalidInput(format!(
                "position must be between 1 and {}",
                upcoming
            )));
        }

        let track = self.tracks.remove(self.position + from);
        self.tracks.insert(self.position + to, track);
        Ok(&self.tracks[self.position + to])
    }

    /// Remove `amount` upcoming tracks starting at `index` (1 = next)
    ///
    /// `amount` is clipped to what exists.
    pub fn remove_upcoming(&mut self, index: usize, amount: usize) -> Result<Vec<QueuedTrack>> {
        let upcoming = self.upcoming_len();
        if index < 1 || index > upcoming {
            return Err(Error::InvalidInput(format!(
                "position must be between 1 and {}",
                upcoming
            )));
        }
        if amount == 0 {
            return Err(Error::InvalidInput("amount must be at least 1".to_string()));
        }

        let start = self.position + index;
        let end = (start + amount).min(self.tracks.len());
        Ok(self.tracks.drain(start..end).collect())
    }

    /// Remove the current track; the cursor then points at the next one
    pub fn remove_current(&mut self) -> Option<QueuedTrack> {
        if self.position < self.tracks.len() {
            Some(self.tracks.remove(self.position))
        } else {
            None
        }
    }

    /// Drop everything but the current track, which becomes index 0
    pub fn clear_keep_current(&mut self) {
        let current = self.current().cloned();
        self.tracks.clear();
        self.tracks.extend(current);
        self.position = 0;
    }

    /// Drop every track and reset the cursor
    pub fn clear_all(&mut self) {
        self.tracks.clear();
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::types::fixtures::{playlist_queued, queued};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn queue_of(urls: &[&str]) -> Queue {
        let mut queue = Queue::new();
        for url in urls {
            queue.add(queued(url), false);
        }
        queue
    }

    fn urls(tracks: &[QueuedTrack]) -> Vec<&str> {
        tracks.iter().map(|t| t.url()).collect()
    }

    #[test]
    fn test_forward_two_in_three_track_queue() {
        let mut queue = queue_of(&["A", "B", "C"]);
        queue.advance(2).unwrap();

        assert_eq!(queue.position(), 2);
        assert_eq!(queue.current().unwrap().url(), "C");
        assert!(!queue.can_go_forward(1));
        assert!(queue.can_go_back());
    }

    #[test]
    fn test_advance_stops_at_last_track() {
        let mut queue = queue_of(&["A", "B"]);
        queue.advance(1).unwrap();
        assert!(queue.advance(1).is_err());
        assert_eq!(queue.position(), 1);
        assert_eq!(queue.current().unwrap().url(), "B");
    }

    #[test]
    fn test_finish_leaves_nothing_current() {
        let mut queue = queue_of(&["A"]);
        queue.finish();
        assert_eq!(queue.position(), 1);
        assert!(queue.current().is_none());
        assert!(queue.upcoming().is_empty());
        assert!(!queue.can_go_forward(1));
        assert!(queue.can_go_back());

        queue.back().unwrap();
        assert_eq!(queue.current().unwrap().url(), "A");
    }

    #[test]
    fn test_rejected_navigation_leaves_cursor() {
        let mut queue = queue_of(&["A", "B"]);
        assert!(queue.advance(3).is_err());
        assert!(queue.advance(0).is_err());
        assert!(queue.back().is_err());
        assert_eq!(queue.position(), 0);
    }

    #[test]
    fn test_position_stays_in_bounds_for_mixed_sequence() {
        let mut queue = Queue::new();
        let mut rng = StdRng::seed_from_u64(7);

        for step in 0..500 {
            match rng.gen_range(0..5) {
                0 => {
                    queue.add(queued(&step.to_string()), rng.gen_bool(0.5));
                }
                1 => {
                    let _ = queue.advance(rng.gen_range(0..3));
                }
                2 => {
                    let _ = queue.back();
                }
                3 => queue.finish(),
                _ => {
                    queue.add(playlist_queued(&step.to_string()), true);
                }
            }
            assert!(queue.position() <= queue.len());
        }
    }

    #[test]
    fn test_clear_keeps_only_current() {
        let mut queue = queue_of(&["A", "B", "C", "D"]);
        queue.advance(2).unwrap();
        queue.clear_keep_current();

        assert_eq!(urls(queue.tracks()), vec!["C"]);
        assert_eq!(queue.position(), 0);

        let mut exhausted = queue_of(&["A"]);
        exhausted.finish();
        exhausted.clear_keep_current();
        assert_eq!(exhausted.len(), 0);
        assert_eq!(exhausted.position(), 0);
    }

    #[test]
    fn test_add_front_inserts_after_cursor() {
        let mut queue = queue_of(&["A", "B", "C"]);
        queue.advance(1).unwrap();

        let at = queue.add(queued("X"), true);
        assert_eq!(at, 2);
        assert_eq!(urls(queue.tracks()), vec!["A", "B", "X", "C"]);
    }

    #[test]
    fn test_add_all_front_keeps_order() {
        let mut queue = queue_of(&["A", "B"]);
        let added = queue.add_all(vec![queued("X"), queued("Y"), playlist_queued("P")], true);

        assert_eq!(added, 3);
        assert_eq!(urls(queue.tracks()), vec!["A", "X", "Y", "B", "P"]);
    }

    #[test]
    fn test_playlist_track_always_appends() {
        let mut queue = queue_of(&["A", "B", "C"]);
        let at = queue.add(playlist_queued("P"), true);
        assert_eq!(at, 3);
        assert_eq!(queue.tracks().last().unwrap().url(), "P");
    }

    #[test]
    fn test_shuffle_never_touches_history() {
        let mut queue = queue_of(&["A", "B", "C", "D", "E", "F", "G"]);
        queue.advance(2).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        queue.shuffle_upcoming(&mut rng);

        assert_eq!(urls(&queue.tracks()[..3]), vec!["A", "B", "C"]);
        let mut rest = urls(queue.upcoming());
        rest.sort();
        assert_eq!(rest, vec!["D", "E", "F", "G"]);
    }

    #[test]
    fn test_move_track_relative_to_cursor() {
        let mut queue = queue_of(&["A", "B", "C", "D"]);
        queue.advance(1).unwrap();

        let moved = queue.move_track(2, 1).unwrap().url().to_string();
        assert_eq!(moved, "D");
        assert_eq!(urls(queue.tracks()), vec!["A", "B", "D", "C"]);

        assert!(queue.move_track(0, 1).is_err());
        assert!(queue.move_track(1, 3).is_err());
        assert_eq!(urls(queue.tracks()), vec!["A", "B", "D", "C"]);
    }

    #[test]
    fn test_remove_upcoming_clips_amount() {
        let mut queue = queue_of(&["A", "B", "C", "D"]);
        let removed = queue.remove_upcoming(2, 10).unwrap();

        assert_eq!(urls(&removed), vec!["C", "D"]);
        assert_eq!(urls(queue.tracks()), vec!["A", "B"]);
        assert!(queue.remove_upcoming(2, 1).is_err());
    }

    #[test]
    fn test_remove_current_promotes_next() {
        let mut queue = queue_of(&["A", "B"]);
        let removed = queue.remove_current().unwrap();
        assert_eq!(removed.url(), "A");
        assert_eq!(queue.current().unwrap().url(), "B");
    }
}
