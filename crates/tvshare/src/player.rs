//! Playback controller seam.
//!
//! The session drives exactly one active stream target (a resolved queue URL
//! or the local fallback clip) through the [`Player`] trait. Real renderers
//! live outside this crate; [`SimPlayer`] is a clock-driven implementation
//! used by the peer binary and the scenario tests.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Events raised by the controller back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// A non-looping stream reached its natural end. Fired exactly once.
    Finished,
    /// The underlying transport reported a fault after a URL was accepted.
    Error(String),
}

#[derive(Debug)]
pub enum PlayerError {
    /// `play_local` was handed a path that does not exist.
    MissingAsset(PathBuf),
    /// The playback backend rejected the target.
    Backend(String),
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerError::MissingAsset(path) => write!(f, "missing local asset {path:?}"),
            PlayerError::Backend(reason) => write!(f, "playback backend error: {reason}"),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Transport-facing playback primitives.
///
/// `is_paused` means: a target is loaded, playback is not running, and
/// preparation has completed. Events are drained from the session tick via
/// `poll_event`, which keeps all state mutation on the session thread.
pub trait Player: Send {
    fn play_remote(&mut self, url: &str) -> Result<(), PlayerError>;
    fn play_local(&mut self, path: &Path, looped: bool) -> Result<(), PlayerError>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn set_looping(&mut self, looped: bool);
    fn is_playing(&self) -> bool;
    fn is_paused(&self) -> bool;
    fn is_prepared(&self) -> bool;
    fn position_secs(&self) -> f64;
    fn duration_secs(&self) -> Option<f64>;
    fn seek(&mut self, seconds: f64);
    fn poll_event(&mut self) -> Option<PlayerEvent>;
}

/// Tunables for the simulated renderer.
#[derive(Clone, Debug)]
pub struct SimPlayerConfig {
    /// Duration assigned to every accepted stream.
    pub duration_secs: f64,
    /// Time between accepting a target and reporting prepared.
    pub prepare_delay: Duration,
}

impl Default for SimPlayerConfig {
    fn default() -> Self {
        Self {
            duration_secs: 300.0,
            prepare_delay: Duration::ZERO,
        }
    }
}

struct Target {
    source: String,
    looped: bool,
    duration: f64,
    loaded_at: Instant,
    prepare_delay: Duration,
    /// Seconds accumulated before the last resume.
    base: f64,
    /// Set while running, `None` while paused.
    started_at: Option<Instant>,
}

impl Target {
    fn position(&self) -> f64 {
        let run = self
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let pos = self.base + run;
        if self.looped && self.duration > 0.0 {
            pos % self.duration
        } else {
            pos
        }
    }

    fn prepared(&self) -> bool {
        self.loaded_at.elapsed() >= self.prepare_delay
    }
}

#[derive(Default)]
struct SimState {
    target: Option<Target>,
    pending: VecDeque<PlayerEvent>,
}

/// Clock-driven renderer: accepts any target, tracks elapsed wall time, and
/// reports `Finished` once a non-looping target runs past its duration.
pub struct SimPlayer {
    config: Arc<Mutex<SimPlayerConfig>>,
    state: Arc<Mutex<SimState>>,
}

/// Observer/injector handle for tests and the console front end.
#[derive(Clone)]
pub struct SimPlayerHandle {
    config: Arc<Mutex<SimPlayerConfig>>,
    state: Arc<Mutex<SimState>>,
}

impl SimPlayer {
    pub fn new(config: SimPlayerConfig) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    pub fn handle(&self) -> SimPlayerHandle {
        SimPlayerHandle {
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }

    fn load(&mut self, source: String, looped: bool) {
        let config = self.config.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();
        state.target = Some(Target {
            source,
            looped,
            duration: config.duration_secs,
            loaded_at: Instant::now(),
            prepare_delay: config.prepare_delay,
            base: 0.0,
            started_at: Some(Instant::now()),
        });
    }
}

impl SimPlayerHandle {
    /// Source string of the currently loaded target, if any.
    pub fn current_source(&self) -> Option<String> {
        self.state.lock().unwrap().target.as_ref().map(|t| t.source.clone())
    }

    /// Queue a playback fault, as if the stream broke mid-play.
    pub fn inject_fault(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .pending
            .push_back(PlayerEvent::Error(message.to_string()));
    }

    pub fn set_duration_secs(&self, secs: f64) {
        self.config.lock().unwrap().duration_secs = secs;
    }

    pub fn set_prepare_delay(&self, delay: Duration) {
        self.config.lock().unwrap().prepare_delay = delay;
    }

    /// Shift the playhead of the loaded target by `delta` seconds.
    pub fn nudge_position(&self, delta: f64) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(target) = state.target.as_mut() {
                target.base += delta;
            }
        }
    }

    pub fn position_secs(&self) -> f64 {
        self.state
            .lock()
            .unwrap()
            .target
            .as_ref()
            .map(|t| t.position())
            .unwrap_or(0.0)
    }
}

impl Player for SimPlayer {
    fn play_remote(&mut self, url: &str) -> Result<(), PlayerError> {
        self.load(url.to_string(), false);
        Ok(())
    }

    fn play_local(&mut self, path: &Path, looped: bool) -> Result<(), PlayerError> {
        if !path.exists() {
            return Err(PlayerError::MissingAsset(path.to_path_buf()));
        }
        self.load(path.to_string_lossy().to_string(), looped);
        Ok(())
    }

    fn pause(&mut self) {
        let mut state = self.state.lock().unwrap();
        if let Some(target) = state.target.as_mut() {
            if let Some(started) = target.started_at.take() {
                target.base += started.elapsed().as_secs_f64();
            }
        }
    }

    fn resume(&mut self) {
        let mut state = self.state.lock().unwrap();
        if let Some(target) = state.target.as_mut() {
            if target.started_at.is_none() {
                target.started_at = Some(Instant::now());
            }
        }
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.target = None;
        state.pending.clear();
    }

    fn set_looping(&mut self, looped: bool) {
        if let Some(target) = self.state.lock().unwrap().target.as_mut() {
            target.looped = looped;
        }
    }

    fn is_playing(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .target
            .as_ref()
            .is_some_and(|t| t.started_at.is_some())
    }

    fn is_paused(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .target
            .as_ref()
            .is_some_and(|t| t.started_at.is_none() && t.prepared())
    }

    fn is_prepared(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .target
            .as_ref()
            .is_some_and(|t| t.prepared())
    }

    fn position_secs(&self) -> f64 {
        self.state
            .lock()
            .unwrap()
            .target
            .as_ref()
            .map(|t| t.position())
            .unwrap_or(0.0)
    }

    fn duration_secs(&self) -> Option<f64> {
        self.state.lock().unwrap().target.as_ref().map(|t| t.duration)
    }

    fn seek(&mut self, seconds: f64) {
        let mut state = self.state.lock().unwrap();
        if let Some(target) = state.target.as_mut() {
            target.base = seconds.max(0.0);
            if target.started_at.is_some() {
                target.started_at = Some(Instant::now());
            }
        }
    }

    fn poll_event(&mut self) -> Option<PlayerEvent> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state.pending.pop_front() {
            // A queued fault invalidates the current target.
            if matches!(event, PlayerEvent::Error(_)) {
                state.target = None;
            }
            return Some(event);
        }
        let ended = state
            .target
            .as_ref()
            .is_some_and(|t| t.started_at.is_some() && !t.looped && t.position() >= t.duration);
        if ended {
            state.target = None;
            return Some(PlayerEvent::Finished);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_player() -> (SimPlayer, SimPlayerHandle) {
        let player = SimPlayer::new(SimPlayerConfig {
            duration_secs: 0.05,
            prepare_delay: Duration::ZERO,
        });
        let handle = player.handle();
        (player, handle)
    }

    #[test]
    fn finished_fires_once_after_duration() {
        let (mut player, _) = short_player();
        player.play_remote("https://cdn.example/v.mp4").unwrap();
        assert!(player.is_playing());
        assert!(player.poll_event().is_none());
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(player.poll_event(), Some(PlayerEvent::Finished));
        assert!(player.poll_event().is_none());
        assert!(!player.is_playing());
    }

    #[test]
    fn looping_target_never_finishes() {
        let (mut player, _) = short_player();
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("fallback.mp4");
        std::fs::write(&clip, b"clip").unwrap();
        player.play_local(&clip, true).unwrap();
        std::thread::sleep(Duration::from_millis(80));
        assert!(player.poll_event().is_none());
        assert!(player.is_playing());
    }

    #[test]
    fn play_local_missing_path_errors_synchronously() {
        let (mut player, _) = short_player();
        let err = player.play_local(Path::new("/nonexistent/clip.mp4"), true);
        assert!(matches!(err, Err(PlayerError::MissingAsset(_))));
        assert!(!player.is_playing());
    }

    #[test]
    fn pause_retains_position_and_resume_continues() {
        let (mut player, handle) = short_player();
        handle.set_duration_secs(100.0);
        player.play_remote("https://cdn.example/v.mp4").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        player.pause();
        assert!(player.is_paused());
        let at_pause = player.position_secs();
        assert!(at_pause > 0.0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(player.position_secs(), at_pause);
        player.resume();
        assert!(player.is_playing());
        assert!(player.position_secs() >= at_pause);
    }

    #[test]
    fn injected_fault_surfaces_and_clears_target() {
        let (mut player, handle) = short_player();
        handle.set_duration_secs(100.0);
        player.play_remote("https://cdn.example/v.mp4").unwrap();
        handle.inject_fault("stream reset");
        assert_eq!(
            player.poll_event(),
            Some(PlayerEvent::Error("stream reset".to_string()))
        );
        assert!(!player.is_playing());
    }

    #[test]
    fn seek_moves_position() {
        let (mut player, _) = short_player();
        let handle = player.handle();
        handle.set_duration_secs(100.0);
        player.play_remote("https://cdn.example/v.mp4").unwrap();
        player.seek(42.0);
        assert!(player.position_secs() >= 42.0);
    }
}
