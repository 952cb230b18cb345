//! Cyclic playback queue with per-reference retry accounting.
//!
//! Owned and mutated exclusively by the session thread; everything else
//! observes it through status snapshots.

use std::collections::HashMap;

use crate::normalize::{Reference, normalize};

/// Retry budget per distinct normalized reference before permanent eviction.
pub const MAX_RETRIES: u32 = 2;

/// One queued item. The raw input is kept for display; the normalized
/// reference is computed once at insertion and never changes.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub raw: String,
    pub reference: Reference,
}

/// Ordered, cyclic playlist. `cursor` points at the next entry to serve and
/// is always in `0..len` while the queue is non-empty, `0` when empty.
#[derive(Debug, Default)]
pub struct Queue {
    entries: Vec<QueueEntry>,
    cursor: usize,
    retries: HashMap<String, u32>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize and append a raw reference. Never fails.
    pub fn add(&mut self, raw: &str) -> &QueueEntry {
        let entry = QueueEntry {
            raw: raw.to_string(),
            reference: normalize(raw),
        };
        self.entries.push(entry);
        // Safe: just pushed.
        &self.entries[self.entries.len() - 1]
    }

    /// Return the entry at the cursor and advance cyclically.
    pub fn next(&mut self) -> Option<Reference> {
        if self.entries.is_empty() {
            return None;
        }
        let reference = self.entries[self.cursor].reference.clone();
        self.cursor = (self.cursor + 1) % self.entries.len();
        Some(reference)
    }

    /// Entry at the cursor without advancing.
    pub fn current(&self) -> Option<&Reference> {
        self.entries.get(self.cursor).map(|e| &e.reference)
    }

    /// Advance the cursor cyclically without serving; no-op when empty.
    pub fn skip(&mut self) {
        if !self.entries.is_empty() {
            self.cursor = (self.cursor + 1) % self.entries.len();
        }
    }

    /// Drop everything: entries, cursor, retry counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
        self.retries.clear();
    }

    /// Delete the entry at the cursor. The entry that slides into the freed
    /// slot is served next; the cursor is clamped back into range.
    pub fn remove_current(&mut self) -> Option<Reference> {
        if self.entries.is_empty() {
            return None;
        }
        let removed = self.entries.remove(self.cursor);
        if self.entries.is_empty() {
            self.cursor = 0;
        } else {
            self.cursor %= self.entries.len();
        }
        Some(removed.reference)
    }

    /// Delete the first entry matching `reference`, fixing up the cursor the
    /// same way as [`Queue::remove_current`]. Returns `false` if absent.
    pub fn remove_by_reference(&mut self, reference: &Reference) -> bool {
        let Some(index) = self.entries.iter().position(|e| &e.reference == reference) else {
            return false;
        };
        self.entries.remove(index);
        if self.entries.is_empty() {
            self.cursor = 0;
        } else {
            if index < self.cursor {
                self.cursor -= 1;
            }
            self.cursor %= self.entries.len();
        }
        true
    }

    /// Move the cursor back onto the first entry matching `reference`, so the
    /// next `next()` serves it again. Used for retry-in-place after a failed
    /// resolution. Returns `false` if the entry is gone.
    pub fn rewind_to(&mut self, reference: &Reference) -> bool {
        match self.entries.iter().position(|e| &e.reference == reference) {
            Some(index) => {
                self.cursor = index;
                true
            }
            None => false,
        }
    }

    /// Bump the retry counter for a reference, creating it at zero if absent.
    /// Returns `true` once the counter reaches [`MAX_RETRIES`].
    pub fn increment_retry(&mut self, reference: &Reference) -> bool {
        let count = self.retries.entry(reference.as_str().to_string()).or_insert(0);
        *count += 1;
        *count >= MAX_RETRIES
    }

    /// Forget the retry counter for a reference after a clean success.
    pub fn reset_retry(&mut self, reference: &Reference) {
        self.retries.remove(reference.as_str());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw inputs in queue order, for display.
    pub fn raw_entries(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.raw.clone()).collect()
    }
}
