//! In-process event bus for user-visible session updates.
//!
//! Transient retries stay in the logs; only evictions, faults, and state
//! changes reach subscribers.

use tokio::sync::broadcast;

/// Session event payloads published by the core.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    QueueChanged,
    PlaybackChanged,
    /// An entry exhausted its retry budget and was removed from the queue.
    EntryEvicted {
        reference: String,
        error: String,
    },
    /// The stream reported a fault after playback had started.
    PlaybackFault {
        message: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus with a bounded broadcast channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn queue_changed(&self) {
        let _ = self.sender.send(SessionEvent::QueueChanged);
    }

    pub fn playback_changed(&self) {
        let _ = self.sender.send(SessionEvent::PlaybackChanged);
    }

    pub fn entry_evicted(&self, reference: &str, error: &str) {
        let _ = self.sender.send(SessionEvent::EntryEvicted {
            reference: reference.to_string(),
            error: error.to_string(),
        });
    }

    pub fn playback_fault(&self, message: &str) {
        let _ = self.sender.send(SessionEvent::PlaybackFault {
            message: message.to_string(),
        });
    }
}
