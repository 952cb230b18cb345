//! Session tunables.
//!
//! Every timing constant the state machine and replication layer rely on,
//! collected in one place so tests can shrink them.

use std::path::PathBuf;
use std::time::Duration;

/// Timing and policy knobs for one peer session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Cadence of the decision tick.
    pub tick_interval: Duration,
    /// Delay before re-attempting the same item after a failed resolution.
    pub retry_delay: Duration,
    /// Delay before moving on after an item was permanently evicted.
    pub evict_advance_delay: Duration,
    /// Delay between a finished item and auto-advancing to the next one.
    pub auto_advance_delay: Duration,
    /// Interval of the host's position heartbeat while a queue item plays.
    pub position_interval: Duration,
    /// Follower seeks only when local/host positions differ by more than this.
    pub drift_threshold_secs: f64,
    /// Follower settle time after start before requesting a state snapshot.
    pub join_settle_delay: Duration,
    /// Poll interval while waiting for a stream to report prepared.
    pub prepared_poll_interval: Duration,
    /// Local clip looped whenever the queue is empty. Assumed present;
    /// absence is a configuration error surfaced at point of use.
    pub fallback_clip: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            retry_delay: Duration::from_secs(3),
            evict_advance_delay: Duration::from_secs(1),
            auto_advance_delay: Duration::from_millis(500),
            position_interval: Duration::from_secs(2),
            drift_threshold_secs: 1.0,
            join_settle_delay: Duration::from_millis(500),
            prepared_poll_interval: Duration::from_millis(100),
            fallback_clip: PathBuf::from("assets/fallback.mp4"),
        }
    }
}
