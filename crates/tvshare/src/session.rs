//! Session thread: the per-peer state machine.
//!
//! One thread owns the queue, the playback phase, the controller, and the
//! timer heap. Everything reaches it as a [`SessionMsg`]; the loop wakes on
//! the next timer deadline or the decision tick, whichever is sooner.
//! Replication policy (host vs follower) is a strategy object layered on
//! top of [`SessionCore`], so the state machine itself is role-agnostic.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tvshare_types::{PeerId, TvState, WireMessage};

use crate::config::SessionConfig;
use crate::device::DeviceSignal;
use crate::events::EventBus;
use crate::normalize::Reference;
use crate::player::{Player, PlayerEvent};
use crate::queue::Queue;
use crate::replicate::{FollowerReplicator, HostReplicator, Replicator};
use crate::resolve::{Resolve, ResolveRequest};
use crate::scheduler::{Scheduler, TimerId, TimerKind};
use crate::status::{PhaseLabel, StatusSnapshot, StatusStore};
use crate::transport::Transport;

/// Queue mutation issued by the local front end.
#[derive(Clone, Debug)]
pub enum UserCommand {
    Add(String),
    Skip,
    Clear,
}

/// Everything the session thread reacts to.
#[derive(Debug)]
pub enum SessionMsg {
    Command(UserCommand),
    /// Resolver verdict for a request issued under `generation`.
    Resolved {
        generation: u64,
        reference: Reference,
        url: Option<String>,
    },
    /// Inbound transport delivery.
    Wire { from: PeerId, message: WireMessage },
    Shutdown,
}

/// Replication role for one peer.
pub enum Role {
    Host,
    Follower { host: PeerId },
}

/// Where playback currently stands.
///
/// `PausedOffline` remembers the phase to restore when the output device
/// comes back; it only ever wraps one of the two playing phases.
#[derive(Clone, Debug)]
pub(crate) enum PlaybackPhase {
    Idle,
    Loading { reference: Reference },
    PlayingItem { url: String },
    PlayingFallback,
    PausedOffline { resume: Box<PlaybackPhase> },
}

/// Outcome of a decision tick, for the replication layer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    None,
    BeganResolution,
    StartedFallback,
}

/// Outcome of applying a resolver verdict.
#[derive(Debug)]
pub(crate) enum ResolutionOutcome {
    Played(String),
    Failed,
    Stale,
}

/// Role-independent session state. The replication strategies mutate it
/// through these methods and never poke fields behind its back.
pub(crate) struct SessionCore {
    pub(crate) config: SessionConfig,
    pub(crate) queue: Queue,
    pub(crate) phase: PlaybackPhase,
    pub(crate) player: Box<dyn Player>,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) scheduler: Scheduler,
    pub(crate) events: EventBus,
    device: Arc<dyn DeviceSignal>,
    device_was_on: bool,
    resolver: Option<Arc<dyn Resolve>>,
    status: StatusStore,
    self_tx: Sender<SessionMsg>,
    /// Skip was requested; suppresses the auto-advance delay once.
    skip_requested: bool,
    /// A timed delay is pending; the begin-resolution rule stays quiet.
    decision_hold: bool,
    /// Timer backing the current hold, cancelled when the hold is lifted
    /// early by a skip or clear.
    hold_timer: Option<TimerId>,
    /// Bumped whenever in-flight resolutions become irrelevant.
    generation: u64,
    /// Fallback clip failed to load; stop retrying every tick.
    fallback_failed: bool,
}

impl SessionCore {
    /// Whether a queue item is current, counting one parked behind a
    /// powered-off device.
    pub(crate) fn is_playing_item(&self) -> bool {
        match &self.phase {
            PlaybackPhase::PlayingItem { .. } => true,
            PlaybackPhase::PausedOffline { resume } => {
                matches!(**resume, PlaybackPhase::PlayingItem { .. })
            }
            _ => false,
        }
    }

    fn hold_for(&mut self, delay: Duration) {
        if let Some(id) = self.hold_timer.take() {
            self.scheduler.cancel(id);
        }
        self.decision_hold = true;
        self.hold_timer = Some(self.scheduler.schedule(delay, TimerKind::ReleaseHold));
    }

    fn release_hold(&mut self) {
        if let Some(id) = self.hold_timer.take() {
            self.scheduler.cancel(id);
        }
        self.decision_hold = false;
    }

    /// Rule: power transitions. Returns whether the device is on; while it
    /// is off, every other decision rule stays quiet.
    fn tick_power(&mut self) -> bool {
        let on = self.device.is_powered_on();
        if !on {
            if self.device_was_on {
                self.device_was_on = false;
                tracing::info!("output device powered off");
            }
            // Covers playback started while the device was already off,
            // e.g. a resolution that landed after power-down.
            if self.player.is_playing() {
                self.player.pause();
                let resumed = std::mem::replace(&mut self.phase, PlaybackPhase::Idle);
                self.phase = PlaybackPhase::PausedOffline {
                    resume: Box::new(resumed),
                };
                self.events.playback_changed();
            }
            return false;
        }
        if !self.device_was_on {
            self.device_was_on = true;
            tracing::info!("output device powered on");
            if let PlaybackPhase::PausedOffline { resume } =
                std::mem::replace(&mut self.phase, PlaybackPhase::Idle)
            {
                self.phase = *resume;
                if self.player.is_paused() {
                    self.player.resume();
                }
                self.events.playback_changed();
            }
        }
        true
    }

    fn drain_player_events(&mut self) {
        while let Some(event) = self.player.poll_event() {
            match event {
                PlayerEvent::Finished => self.on_finished(),
                PlayerEvent::Error(message) => self.on_playback_fault(&message),
            }
        }
    }

    /// Rule: an item finished on its own. Hold briefly before advancing
    /// unless a skip already paid for the transition.
    fn on_finished(&mut self) {
        if !matches!(
            self.phase,
            PlaybackPhase::PlayingItem { .. } | PlaybackPhase::PlayingFallback
        ) {
            return;
        }
        tracing::debug!("playback finished");
        self.phase = PlaybackPhase::Idle;
        if self.skip_requested {
            self.skip_requested = false;
        } else if !self.queue.is_empty() {
            self.hold_for(self.config.auto_advance_delay);
        }
        self.events.playback_changed();
    }

    /// Rule: the controller faulted mid-play. Charge a retry against the
    /// current item; evict it once retries are exhausted.
    fn on_playback_fault(&mut self, message: &str) {
        tracing::warn!(error = %message, "playback fault");
        self.player.stop();
        self.phase = PlaybackPhase::Idle;
        self.events.playback_fault(message);
        let Some(current) = self.queue.current().cloned() else {
            return;
        };
        if self.queue.increment_retry(&current) {
            self.queue.remove_current();
            tracing::warn!(reference = %current, "evicting after repeated faults");
            self.events.entry_evicted(current.as_str(), message);
            self.events.queue_changed();
            self.hold_for(self.config.evict_advance_delay);
        } else {
            self.hold_for(self.config.retry_delay);
        }
        self.events.playback_changed();
    }

    /// Decision rules run by the authority only: start resolving the next
    /// item, or fall back to the local loop when the queue drains.
    fn decide(&mut self) -> Decision {
        if !self.queue.is_empty() {
            if matches!(self.phase, PlaybackPhase::PlayingFallback) {
                self.player.stop();
                self.phase = PlaybackPhase::Idle;
            }
            if matches!(self.phase, PlaybackPhase::Idle)
                && !self.decision_hold
                && !self.player.is_playing()
            {
                if let Some(reference) = self.queue.next() {
                    self.begin_resolution(reference);
                    return Decision::BeganResolution;
                }
            }
            Decision::None
        } else if matches!(self.phase, PlaybackPhase::Idle)
            && !self.player.is_playing()
            && !self.fallback_failed
        {
            if self.start_fallback() {
                Decision::StartedFallback
            } else {
                Decision::None
            }
        } else {
            Decision::None
        }
    }

    fn begin_resolution(&mut self, reference: Reference) {
        let Some(resolver) = &self.resolver else {
            tracing::error!("no resolver configured; cannot start resolution");
            return;
        };
        tracing::info!(reference = %reference, "resolving next item");
        self.skip_requested = false;
        self.phase = PlaybackPhase::Loading {
            reference: reference.clone(),
        };
        resolver.submit(ResolveRequest {
            reference,
            generation: self.generation,
            reply: self.self_tx.clone(),
        });
        self.events.playback_changed();
    }

    /// Apply a resolver verdict, ignoring anything stale.
    pub(crate) fn apply_resolution(
        &mut self,
        generation: u64,
        reference: Reference,
        url: Option<String>,
    ) -> ResolutionOutcome {
        let relevant = generation == self.generation
            && matches!(&self.phase, PlaybackPhase::Loading { reference: r } if *r == reference);
        if !relevant {
            tracing::debug!(reference = %reference, "discarding stale resolution");
            return ResolutionOutcome::Stale;
        }
        match url {
            Some(url) if !url.is_empty() => {
                self.queue.reset_retry(&reference);
                if let Err(e) = self.player.play_remote(&url) {
                    tracing::warn!(error = %e, "controller rejected resolved stream");
                    self.fail_resolution(&reference, &e.to_string());
                    return ResolutionOutcome::Failed;
                }
                tracing::info!(url = %url, "item playing");
                self.phase = PlaybackPhase::PlayingItem { url: url.clone() };
                self.events.playback_changed();
                ResolutionOutcome::Played(url)
            }
            _ => {
                self.fail_resolution(&reference, "resolution failed");
                ResolutionOutcome::Failed
            }
        }
    }

    fn fail_resolution(&mut self, reference: &Reference, why: &str) {
        self.phase = PlaybackPhase::Idle;
        if self.queue.increment_retry(reference) {
            self.queue.remove_by_reference(reference);
            tracing::warn!(reference = %reference, "evicting after exhausted retries");
            self.events.entry_evicted(reference.as_str(), why);
            self.events.queue_changed();
            if !self.queue.is_empty() {
                self.hold_for(self.config.evict_advance_delay);
            }
        } else {
            // Retry in place: the cursor moves back so the same item is
            // served again after the delay.
            self.queue.rewind_to(reference);
            tracing::info!(reference = %reference, "resolution failed; will retry");
            self.hold_for(self.config.retry_delay);
        }
        self.events.playback_changed();
    }

    pub(crate) fn apply_add(&mut self, raw: &str) {
        let entry = self.queue.add(raw);
        tracing::info!(raw = %raw, reference = %entry.reference, "queued");
        self.fallback_failed = false;
        self.events.queue_changed();
    }

    /// Stop whatever plays and let the next tick decide afresh. Used for
    /// both skip and the playback side of clear.
    pub(crate) fn apply_skip(&mut self) {
        tracing::info!("skip");
        self.generation += 1;
        self.player.stop();
        self.phase = PlaybackPhase::Idle;
        self.skip_requested = true;
        self.release_hold();
        self.events.playback_changed();
    }

    pub(crate) fn apply_clear(&mut self) -> usize {
        let dropped = self.queue.len();
        tracing::info!(dropped, "clearing queue");
        self.generation += 1;
        self.queue.clear();
        self.release_hold();
        self.player.stop();
        self.phase = PlaybackPhase::Idle;
        self.skip_requested = true;
        self.events.queue_changed();
        self.events.playback_changed();
        dropped
    }

    /// Follower path: play a stream the host already resolved.
    pub(crate) fn apply_remote_play(&mut self, url: &str) {
        if let Err(e) = self.player.play_remote(url) {
            tracing::warn!(error = %e, url = %url, "controller rejected remote stream");
            return;
        }
        self.phase = PlaybackPhase::PlayingItem {
            url: url.to_string(),
        };
        self.skip_requested = false;
        self.events.playback_changed();
    }

    pub(crate) fn start_fallback(&mut self) -> bool {
        self.skip_requested = false;
        let clip = self.config.fallback_clip.clone();
        match self.player.play_local(&clip, true) {
            Ok(()) => {
                tracing::info!(clip = %clip.display(), "fallback loop started");
                self.phase = PlaybackPhase::PlayingFallback;
                self.events.playback_changed();
                true
            }
            Err(e) => {
                tracing::error!(error = %e, clip = %clip.display(), "cannot start fallback clip");
                self.fallback_failed = true;
                false
            }
        }
    }

    /// Stop playback outright (snapshot says nothing should be playing).
    pub(crate) fn stop_playback(&mut self) {
        self.player.stop();
        self.phase = PlaybackPhase::Idle;
        self.events.playback_changed();
    }

    /// Snapshot for a late joiner.
    pub(crate) fn build_tv_state(&self) -> TvState {
        let current_url = match &self.phase {
            PlaybackPhase::PlayingItem { url } => Some(url.clone()),
            PlaybackPhase::PausedOffline { resume } => match &**resume {
                PlaybackPhase::PlayingItem { url } => Some(url.clone()),
                _ => None,
            },
            _ => None,
        };
        TvState {
            device_powered_on: self.device.is_powered_on(),
            is_playing_fallback: matches!(self.phase, PlaybackPhase::PlayingFallback),
            position_seconds: if current_url.is_some() {
                self.player.position_secs()
            } else {
                0.0
            },
            current_url,
            is_playing: self.player.is_playing(),
        }
    }

    fn refresh_status(&self) {
        let (phase, current_url) = match &self.phase {
            PlaybackPhase::Idle => (PhaseLabel::Idle, None),
            PlaybackPhase::Loading { .. } => (PhaseLabel::Loading, None),
            PlaybackPhase::PlayingItem { url } => (PhaseLabel::PlayingItem, Some(url.clone())),
            PlaybackPhase::PlayingFallback => (PhaseLabel::PlayingFallback, None),
            PlaybackPhase::PausedOffline { resume } => {
                let url = match &**resume {
                    PlaybackPhase::PlayingItem { url } => Some(url.clone()),
                    _ => None,
                };
                (PhaseLabel::PausedOffline, url)
            }
        };
        self.status.set(StatusSnapshot {
            device_powered_on: self.device.is_powered_on(),
            phase,
            queue_len: self.queue.len(),
            queue: self.queue.raw_entries(),
            current_url,
            position_secs: self.player.position_secs(),
            is_loading: matches!(self.phase, PlaybackPhase::Loading { .. }),
        });
    }
}

/// Everything needed to spawn a session thread.
pub struct SessionParams {
    pub config: SessionConfig,
    pub me: PeerId,
    pub role: Role,
    pub device: Arc<dyn DeviceSignal>,
    pub player: Box<dyn Player>,
    /// Required for the host; followers never resolve.
    pub resolver: Option<Arc<dyn Resolve>>,
    pub transport: Box<dyn Transport>,
}

/// Front-end handle to a running session.
pub struct SessionHandle {
    tx: Sender<SessionMsg>,
    status: StatusStore,
    events: EventBus,
    join: Option<JoinHandle<()>>,
}

/// Session inbox plus its receiving end. Created before the session so the
/// sender can be registered with the transport first.
pub fn channel() -> (Sender<SessionMsg>, Receiver<SessionMsg>) {
    unbounded()
}

pub struct Session;

impl Session {
    /// Spawn the session thread. `tx`/`rx` come from [`channel`]; `tx` is
    /// also what the transport delivers inbound wire messages to.
    pub fn spawn(
        params: SessionParams,
        tx: Sender<SessionMsg>,
        rx: Receiver<SessionMsg>,
    ) -> SessionHandle {
        let status = StatusStore::new();
        let events = EventBus::new();
        let core = SessionCore {
            config: params.config,
            queue: Queue::new(),
            phase: PlaybackPhase::Idle,
            player: params.player,
            transport: params.transport,
            scheduler: Scheduler::new(),
            events: events.clone(),
            device: params.device,
            device_was_on: false,
            resolver: params.resolver,
            status: status.clone(),
            self_tx: tx.clone(),
            skip_requested: false,
            decision_hold: false,
            hold_timer: None,
            generation: 0,
            fallback_failed: false,
        };
        let replicator: Box<dyn Replicator> = match params.role {
            Role::Host => Box::new(HostReplicator::new()),
            Role::Follower { host } => Box::new(FollowerReplicator::new(host)),
        };
        let me = params.me;
        let join = thread::Builder::new()
            .name(format!("session-{me}"))
            .spawn(move || run_loop(core, replicator, rx))
            .ok();
        SessionHandle {
            tx,
            status,
            events,
            join,
        }
    }
}

impl SessionHandle {
    pub fn add(&self, raw: &str) {
        let _ = self
            .tx
            .send(SessionMsg::Command(UserCommand::Add(raw.to_string())));
    }

    pub fn skip(&self) {
        let _ = self.tx.send(SessionMsg::Command(UserCommand::Skip));
    }

    pub fn clear(&self) {
        let _ = self.tx.send(SessionMsg::Command(UserCommand::Clear));
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.get()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Sender for registering this session with a transport bus.
    pub fn inbox(&self) -> Sender<SessionMsg> {
        self.tx.clone()
    }

    pub fn shutdown(mut self) {
        let _ = self.tx.send(SessionMsg::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(SessionMsg::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_loop(mut core: SessionCore, mut replicator: Box<dyn Replicator>, rx: Receiver<SessionMsg>) {
    replicator.on_start(&mut core);
    loop {
        core.refresh_status();
        let timeout = core
            .scheduler
            .next_deadline()
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(core.config.tick_interval)
            .min(core.config.tick_interval);
        match rx.recv_timeout(timeout) {
            Ok(SessionMsg::Shutdown) => break,
            Ok(msg) => handle_msg(&mut core, replicator.as_mut(), msg),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        let now = Instant::now();
        while let Some(kind) = core.scheduler.pop_due(now) {
            match kind {
                TimerKind::ReleaseHold => {
                    core.decision_hold = false;
                    core.hold_timer = None;
                }
                other => replicator.on_timer(&mut core, other),
            }
        }
        tick(&mut core, replicator.as_mut());
    }
    core.player.stop();
    core.refresh_status();
    tracing::debug!("session thread exiting");
}

fn handle_msg(core: &mut SessionCore, replicator: &mut dyn Replicator, msg: SessionMsg) {
    match msg {
        SessionMsg::Command(command) => replicator.handle_local(core, command),
        SessionMsg::Resolved {
            generation,
            reference,
            url,
        } => {
            if let ResolutionOutcome::Played(url) =
                core.apply_resolution(generation, reference, url)
            {
                replicator.on_play_started(core, &url);
            }
        }
        SessionMsg::Wire { from, message } => replicator.handle_wire(core, from, message),
        SessionMsg::Shutdown => {}
    }
}

fn tick(core: &mut SessionCore, replicator: &mut dyn Replicator) {
    if !core.tick_power() {
        return;
    }
    core.drain_player_events();
    if replicator.is_authority() {
        if core.decide() == Decision::StartedFallback {
            replicator.on_fallback_started(core);
        }
    }
}
