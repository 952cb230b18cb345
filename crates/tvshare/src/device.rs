//! Power signal from the rendering device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only view of the device's power state. The physical device and its
/// on/off control are external; the session only reacts to this signal.
pub trait DeviceSignal: Send + Sync {
    fn is_powered_on(&self) -> bool;
}

/// Shared boolean power switch, flipped by the front end or by tests.
#[derive(Clone, Default)]
pub struct PowerSwitch {
    on: Arc<AtomicBool>,
}

impl PowerSwitch {
    pub fn new(on: bool) -> Self {
        Self {
            on: Arc::new(AtomicBool::new(on)),
        }
    }

    pub fn set(&self, on: bool) {
        self.on.store(on, Ordering::Relaxed);
    }
}

impl DeviceSignal for PowerSwitch {
    fn is_powered_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}
