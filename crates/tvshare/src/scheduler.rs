//! Deadline scheduler for the session loop.
//!
//! Replaces fire-and-forget delayed callbacks with an explicit min-heap of
//! pending timers that can be cancelled. The session loop sleeps until the
//! earliest deadline and drains everything due on wake.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

/// What to do when a timer fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Release the decision hold (retry / post-eviction / auto-advance delay).
    ReleaseHold,
    /// Host: broadcast the playback position heartbeat.
    Heartbeat,
    /// Follower: settle time elapsed, request a state snapshot.
    JoinSettle,
    /// Follower: check whether the stream is prepared for a pending seek.
    PreparedPoll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Entry {
    at: Instant,
    id: u64,
    kind: TimerKind,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at).then(self.id.cmp(&other.id))
    }
}

#[derive(Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<Entry>>,
    cancelled: HashSet<u64>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer `after` from now.
    pub fn schedule(&mut self, after: Duration, kind: TimerKind) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse(Entry {
            at: Instant::now() + after,
            id,
            kind,
        }));
        TimerId(id)
    }

    /// Cancel a pending timer. Cancelling an already-fired timer is a no-op.
    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id.0);
    }

    /// Deadline of the earliest live timer, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.cancelled.remove(&entry.id) {
                self.heap.pop();
                continue;
            }
            return Some(entry.at);
        }
        None
    }

    /// Pop the next timer that is due at `now`, skipping cancelled ones.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKind> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.at > now {
                return None;
            }
            let Reverse(entry) = self.heap.pop()?;
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            return Some(entry.kind);
        }
        None
    }
}
