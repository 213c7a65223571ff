//! Sliding window of per-block match decisions.
//!
//! Backed by a fixed-capacity ring buffer; the number of matches is kept as a
//! running count so both insertion and counting are O(1).

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Most-recent-N history of "block matched the threshold" flags
pub struct SlidingPeakWindow {
    entries: HeapRb<bool>,
    matches: usize,
}

impl SlidingPeakWindow {
    /// Create a window holding `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HeapRb::new(capacity.max(1)),
            matches: 0,
        }
    }

    /// Append a decision, evicting the oldest one once the window is full
    pub fn add(&mut self, matched: bool) {
        if let Some(true) = self.entries.push_overwrite(matched) {
            self.matches -= 1;
        }
        if matched {
            self.matches += 1;
        }
    }

    /// Number of `true` entries currently held
    pub fn match_count(&self) -> usize {
        self.matches
    }

    pub fn len(&self) -> usize {
        self.entries.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity().get()
    }

    /// Whether enough blocks have been seen to take a decision
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &bool> + '_ {
        self.entries.iter()
    }
}
