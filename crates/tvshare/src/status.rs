//! Shared status snapshot for front-end reads.
//!
//! The session thread refreshes this once per tick; readers take cheap
//! copies at any time without touching session state.

use std::sync::{Arc, Mutex};

/// Coarse playback phase, mirroring the session's internal state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PhaseLabel {
    #[default]
    Idle,
    Loading,
    PlayingItem,
    PlayingFallback,
    PausedOffline,
}

#[derive(Clone, Debug, Default)]
pub struct StatusSnapshot {
    pub device_powered_on: bool,
    pub phase: PhaseLabel,
    pub queue_len: usize,
    /// Raw inputs in queue order, for display.
    pub queue: Vec<String>,
    /// Resolved URL currently handed to the playback controller.
    pub current_url: Option<String>,
    pub position_secs: f64,
    /// Whether a resolution is in flight.
    pub is_loading: bool,
}

#[derive(Clone, Default)]
pub struct StatusStore {
    inner: Arc<Mutex<StatusSnapshot>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> StatusSnapshot {
        self.inner.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub(crate) fn set(&self, snapshot: StatusSnapshot) {
        if let Ok(mut s) = self.inner.lock() {
            *s = snapshot;
        }
    }
}
