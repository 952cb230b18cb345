//! Host/follower replication strategies.
//!
//! The host applies every mutation locally first, then broadcasts it; it
//! also owns the position heartbeat and answers late-join state requests.
//! A follower never decides anything: local commands are forwarded to the
//! host and applied only when they come back over the wire, keeping every
//! peer's queue in the same order.

use tvshare_types::{PeerId, PlayCommand, TvState, WireMessage};

use crate::scheduler::TimerKind;
use crate::session::{SessionCore, UserCommand};

/// Role-specific behavior layered over [`SessionCore`].
pub(crate) trait Replicator: Send {
    /// Whether this peer runs the decision rules (resolution, fallback).
    fn is_authority(&self) -> bool;
    fn on_start(&mut self, core: &mut SessionCore);
    fn handle_local(&mut self, core: &mut SessionCore, command: UserCommand);
    fn handle_wire(&mut self, core: &mut SessionCore, from: PeerId, message: WireMessage);
    /// A queue item started playing locally after resolution.
    fn on_play_started(&mut self, core: &mut SessionCore, url: &str);
    /// The fallback loop started locally.
    fn on_fallback_started(&mut self, core: &mut SessionCore);
    fn on_timer(&mut self, core: &mut SessionCore, kind: TimerKind);
}

fn broadcast(core: &mut SessionCore, message: &WireMessage) {
    if let Err(e) = core.transport.broadcast(message) {
        tracing::warn!(error = %e, channel = message.channel(), "broadcast failed");
    }
}

pub(crate) struct HostReplicator {
    heartbeat_armed: bool,
}

impl HostReplicator {
    pub(crate) fn new() -> Self {
        Self {
            heartbeat_armed: false,
        }
    }

    fn arm_heartbeat(&mut self, core: &mut SessionCore) {
        if !self.heartbeat_armed {
            self.heartbeat_armed = true;
            let interval = core.config.position_interval;
            core.scheduler.schedule(interval, TimerKind::Heartbeat);
        }
    }
}

impl Replicator for HostReplicator {
    fn is_authority(&self) -> bool {
        true
    }

    fn on_start(&mut self, _core: &mut SessionCore) {}

    fn handle_local(&mut self, core: &mut SessionCore, command: UserCommand) {
        match command {
            UserCommand::Add(raw) => {
                core.apply_add(&raw);
                broadcast(core, &WireMessage::AddReference { reference: raw });
            }
            UserCommand::Skip => {
                core.apply_skip();
                broadcast(core, &WireMessage::Skip);
            }
            UserCommand::Clear => {
                core.apply_clear();
                broadcast(core, &WireMessage::Clear);
            }
        }
    }

    fn handle_wire(&mut self, core: &mut SessionCore, from: PeerId, message: WireMessage) {
        match message {
            // Follower-forwarded mutations: apply, then rebroadcast so every
            // peer (the originator included) applies them in host order.
            WireMessage::AddReference { reference } => {
                core.apply_add(&reference);
                broadcast(core, &WireMessage::AddReference { reference });
            }
            WireMessage::Skip => {
                core.apply_skip();
                broadcast(core, &WireMessage::Skip);
            }
            WireMessage::Clear => {
                core.apply_clear();
                broadcast(core, &WireMessage::Clear);
            }
            WireMessage::RequestState => {
                let state = core.build_tv_state();
                tracing::info!(peer = %from, "answering state request");
                if let Err(e) = core
                    .transport
                    .send_to(from, &WireMessage::StateSnapshot(state))
                {
                    tracing::warn!(peer = %from, error = %e, "state snapshot undeliverable");
                }
            }
            // Host-only channels; another peer sending them is a role error.
            WireMessage::Play(_)
            | WireMessage::Position { .. }
            | WireMessage::PlayFallback
            | WireMessage::StateSnapshot(_) => {
                tracing::warn!(
                    peer = %from,
                    channel = message.channel(),
                    "ignoring host-only message from peer"
                );
            }
        }
    }

    fn on_play_started(&mut self, core: &mut SessionCore, url: &str) {
        broadcast(
            core,
            &WireMessage::Play(PlayCommand {
                url: url.to_string(),
                start_seconds: 0.0,
            }),
        );
        self.arm_heartbeat(core);
    }

    fn on_fallback_started(&mut self, core: &mut SessionCore) {
        broadcast(core, &WireMessage::PlayFallback);
    }

    fn on_timer(&mut self, core: &mut SessionCore, kind: TimerKind) {
        match kind {
            TimerKind::Heartbeat => {
                self.heartbeat_armed = false;
                // The heartbeat lives only while a queue item is current;
                // it is re-armed from the next play start otherwise.
                if core.is_playing_item() {
                    if core.player.is_playing() {
                        let seconds = core.player.position_secs();
                        broadcast(core, &WireMessage::Position { seconds });
                    }
                    self.arm_heartbeat(core);
                }
            }
            other => {
                tracing::debug!(kind = ?other, "unexpected timer on host");
            }
        }
    }
}

pub(crate) struct FollowerReplicator {
    host: PeerId,
    /// Seek to apply once the stream reports prepared.
    pending_seek: Option<f64>,
    /// Pause to apply once the stream reports prepared (snapshot said the
    /// host is mid-item but not playing).
    pending_pause: bool,
    poll_armed: bool,
}

impl FollowerReplicator {
    pub(crate) fn new(host: PeerId) -> Self {
        Self {
            host,
            pending_seek: None,
            pending_pause: false,
            poll_armed: false,
        }
    }

    fn forward(&self, core: &mut SessionCore, message: &WireMessage) {
        if let Err(e) = core.transport.send_to(self.host, message) {
            tracing::warn!(error = %e, channel = message.channel(), "forward to host failed");
        }
    }

    fn arm_prepared_poll(&mut self, core: &mut SessionCore) {
        if !self.poll_armed {
            self.poll_armed = true;
            let interval = core.config.prepared_poll_interval;
            core.scheduler.schedule(interval, TimerKind::PreparedPoll);
        }
    }

    fn apply_snapshot(&mut self, core: &mut SessionCore, state: TvState) {
        tracing::info!(
            powered_on = state.device_powered_on,
            fallback = state.is_playing_fallback,
            url = state.current_url.as_deref().unwrap_or("-"),
            "applying state snapshot"
        );
        self.pending_seek = None;
        self.pending_pause = false;
        if !state.device_powered_on {
            // The host's output is dark; play nothing until it returns.
            core.stop_playback();
            return;
        }
        if state.is_playing_fallback {
            core.start_fallback();
            return;
        }
        match state.current_url {
            Some(url) => {
                core.apply_remote_play(&url);
                if state.position_seconds > 0.0 {
                    self.pending_seek = Some(state.position_seconds);
                }
                if !state.is_playing {
                    self.pending_pause = true;
                }
                if self.pending_seek.is_some() || self.pending_pause {
                    self.arm_prepared_poll(core);
                }
            }
            None => core.stop_playback(),
        }
    }
}

impl Replicator for FollowerReplicator {
    fn is_authority(&self) -> bool {
        false
    }

    fn on_start(&mut self, core: &mut SessionCore) {
        // Late-join pull: ask for the authoritative state once the
        // transport has had a moment to settle.
        let delay = core.config.join_settle_delay;
        core.scheduler.schedule(delay, TimerKind::JoinSettle);
    }

    fn handle_local(&mut self, core: &mut SessionCore, command: UserCommand) {
        // Nothing is applied locally; the mutation takes effect when the
        // host's rebroadcast arrives.
        let message = match command {
            UserCommand::Add(raw) => WireMessage::AddReference { reference: raw },
            UserCommand::Skip => WireMessage::Skip,
            UserCommand::Clear => WireMessage::Clear,
        };
        self.forward(core, &message);
    }

    fn handle_wire(&mut self, core: &mut SessionCore, from: PeerId, message: WireMessage) {
        if from != self.host {
            tracing::warn!(peer = %from, "ignoring message from non-host peer");
            return;
        }
        match message {
            WireMessage::AddReference { reference } => core.apply_add(&reference),
            WireMessage::Skip => core.apply_skip(),
            WireMessage::Clear => {
                core.apply_clear();
            }
            WireMessage::Play(PlayCommand { url, start_seconds }) => {
                self.pending_pause = false;
                core.apply_remote_play(&url);
                if start_seconds > 0.0 {
                    self.pending_seek = Some(start_seconds);
                    self.arm_prepared_poll(core);
                } else {
                    self.pending_seek = None;
                }
            }
            WireMessage::Position { seconds } => {
                if core.is_playing_item() && core.player.is_playing() {
                    let local = core.player.position_secs();
                    let drift = (local - seconds).abs();
                    if drift > core.config.drift_threshold_secs {
                        tracing::debug!(local, host = seconds, "correcting drift");
                        core.player.seek(seconds);
                    }
                }
            }
            WireMessage::PlayFallback => {
                core.start_fallback();
            }
            WireMessage::StateSnapshot(state) => self.apply_snapshot(core, state),
            WireMessage::RequestState => {
                tracing::warn!(peer = %from, "ignoring state request on a follower");
            }
        }
    }

    fn on_play_started(&mut self, _core: &mut SessionCore, _url: &str) {}

    fn on_fallback_started(&mut self, _core: &mut SessionCore) {}

    fn on_timer(&mut self, core: &mut SessionCore, kind: TimerKind) {
        match kind {
            TimerKind::JoinSettle => {
                tracing::info!("requesting state from host");
                self.forward(core, &WireMessage::RequestState);
            }
            TimerKind::PreparedPoll => {
                self.poll_armed = false;
                if self.pending_seek.is_none() && !self.pending_pause {
                    return;
                }
                if core.player.is_prepared() {
                    if let Some(seconds) = self.pending_seek.take() {
                        core.player.seek(seconds);
                    }
                    if self.pending_pause {
                        self.pending_pause = false;
                        core.player.pause();
                    }
                } else {
                    self.arm_prepared_poll(core);
                }
            }
            other => {
                tracing::debug!(kind = ?other, "unexpected timer on follower");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::device::PowerSwitch;
    use crate::player::{SimPlayer, SimPlayerConfig, SimPlayerHandle};
    use crate::resolve::{Resolve, ResolveRequest};
    use crate::session::{Role, Session, SessionHandle, SessionMsg, SessionParams, channel};
    use crate::status::PhaseLabel;
    use crate::transport::InProcessBus;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    const ID_A: &str = "dQw4w9WgXcQ";
    const URL_A: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
    const CDN_A: &str = "https://cdn.example/a.mp4";

    /// Resolver answering from a fixed table, off-thread like the real one.
    struct CannedResolver {
        answers: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl CannedResolver {
        fn new(answers: &[(&str, &str)]) -> Self {
            Self {
                answers: Arc::new(Mutex::new(
                    answers
                        .iter()
                        .map(|(r, u)| (r.to_string(), u.to_string()))
                        .collect(),
                )),
            }
        }
    }

    impl Resolve for CannedResolver {
        fn submit(&self, request: ResolveRequest) {
            let answers = self.answers.clone();
            thread::spawn(move || {
                let url = answers
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|(r, _)| *r == request.reference.as_str())
                    .map(|(_, u)| u.clone());
                let _ = request.reply.send(SessionMsg::Resolved {
                    generation: request.generation,
                    reference: request.reference,
                    url,
                });
            });
        }

        fn is_resolving(&self) -> bool {
            false
        }
    }

    struct Peer {
        handle: SessionHandle,
        player: SimPlayerHandle,
        power: PowerSwitch,
        _clip_dir: tempfile::TempDir,
    }

    fn fast_config(clip_dir: &tempfile::TempDir) -> SessionConfig {
        let clip = clip_dir.path().join("fallback.mp4");
        std::fs::write(&clip, b"clip").unwrap();
        SessionConfig {
            tick_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(40),
            evict_advance_delay: Duration::from_millis(30),
            auto_advance_delay: Duration::from_millis(20),
            position_interval: Duration::from_millis(50),
            join_settle_delay: Duration::from_millis(30),
            prepared_poll_interval: Duration::from_millis(10),
            fallback_clip: clip,
            ..SessionConfig::default()
        }
    }

    fn spawn_peer(
        bus: &InProcessBus,
        me: PeerId,
        role: Role,
        resolver: Option<Arc<dyn Resolve>>,
    ) -> Peer {
        let clip_dir = tempfile::tempdir().unwrap();
        let config = fast_config(&clip_dir);
        let player = SimPlayer::new(SimPlayerConfig::default());
        let player_handle = player.handle();
        let power = PowerSwitch::new(true);
        let (tx, rx) = channel();
        let endpoint = bus.register(me, tx.clone());
        let handle = Session::spawn(
            SessionParams {
                config,
                me,
                role,
                device: Arc::new(power.clone()),
                player: Box::new(player),
                resolver,
                transport: Box::new(endpoint),
            },
            tx,
            rx,
        );
        Peer {
            handle,
            player: player_handle,
            power,
            _clip_dir: clip_dir,
        }
    }

    fn spawn_host(bus: &InProcessBus, host_id: PeerId, answers: &[(&str, &str)]) -> Peer {
        spawn_peer(
            bus,
            host_id,
            Role::Host,
            Some(Arc::new(CannedResolver::new(answers))),
        )
    }

    fn spawn_follower(bus: &InProcessBus, host_id: PeerId) -> Peer {
        spawn_peer(bus, PeerId::random(), Role::Follower { host: host_id }, None)
    }

    fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for: {what}");
    }

    #[test]
    fn host_add_reaches_follower_queue_and_playback() {
        let bus = InProcessBus::new();
        let host_id = PeerId::random();
        let host = spawn_host(&bus, host_id, &[(URL_A, CDN_A)]);
        let follower = spawn_follower(&bus, host_id);

        host.handle.add(ID_A);
        wait_until("follower has the entry", || {
            follower.handle.status().queue == vec![ID_A.to_string()]
        });
        wait_until("follower plays the same stream", || {
            follower.handle.status().current_url.as_deref() == Some(CDN_A)
        });
        assert_eq!(host.handle.status().current_url.as_deref(), Some(CDN_A));
    }

    #[test]
    fn follower_add_round_trips_through_host() {
        let bus = InProcessBus::new();
        let host_id = PeerId::random();
        let host = spawn_host(&bus, host_id, &[(URL_A, CDN_A)]);
        let follower = spawn_follower(&bus, host_id);

        follower.handle.add(ID_A);
        wait_until("host applies the add", || {
            host.handle.status().queue == vec![ID_A.to_string()]
        });
        wait_until("follower applies the rebroadcast", || {
            follower.handle.status().queue == vec![ID_A.to_string()]
        });
        wait_until("both play the resolved stream", || {
            host.handle.status().current_url.as_deref() == Some(CDN_A)
                && follower.handle.status().current_url.as_deref() == Some(CDN_A)
        });
    }

    #[test]
    fn large_drift_is_corrected_small_drift_is_not() {
        let bus = InProcessBus::new();
        let host_id = PeerId::random();
        let host = spawn_host(&bus, host_id, &[(URL_A, CDN_A)]);
        let follower = spawn_follower(&bus, host_id);

        host.handle.add(ID_A);
        wait_until("follower playing", || {
            follower.handle.status().current_url.as_deref() == Some(CDN_A)
        });

        // Push the follower well past the threshold; the next heartbeat
        // snaps it back to the host's position.
        follower.player.nudge_position(5.0);
        wait_until("large drift corrected", || {
            (follower.player.position_secs() - host.player.position_secs()).abs() < 1.0
        });

        // Sub-threshold drift is left alone across several heartbeats.
        follower.player.nudge_position(0.5);
        thread::sleep(Duration::from_millis(200));
        let drift = follower.player.position_secs() - host.player.position_secs();
        assert!(
            (0.3..0.8).contains(&drift),
            "sub-threshold drift should persist, got {drift}"
        );
    }

    #[test]
    fn late_joiner_pulls_state_and_seeks() {
        let bus = InProcessBus::new();
        let host_id = PeerId::random();
        let host = spawn_host(&bus, host_id, &[(URL_A, CDN_A)]);

        host.handle.add(ID_A);
        wait_until("host playing", || {
            host.handle.status().current_url.as_deref() == Some(CDN_A)
        });
        host.player.nudge_position(42.0);

        let follower = spawn_follower(&bus, host_id);
        wait_until("late joiner plays the current stream", || {
            follower.handle.status().current_url.as_deref() == Some(CDN_A)
        });
        wait_until("late joiner seeks near the host position", || {
            (follower.player.position_secs() - host.player.position_secs()).abs() < 1.0
        });
    }

    #[test]
    fn late_joiner_mirrors_fallback() {
        let bus = InProcessBus::new();
        let host_id = PeerId::random();
        let host = spawn_host(&bus, host_id, &[]);
        wait_until("host on fallback", || {
            host.handle.status().phase == PhaseLabel::PlayingFallback
        });

        let follower = spawn_follower(&bus, host_id);
        wait_until("late joiner loops fallback too", || {
            follower.handle.status().phase == PhaseLabel::PlayingFallback
        });
    }

    #[test]
    fn snapshot_from_powered_off_host_plays_nothing() {
        let bus = InProcessBus::new();
        let host_id = PeerId::random();
        let host = spawn_host(&bus, host_id, &[(URL_A, CDN_A)]);
        host.handle.add(ID_A);
        wait_until("host playing", || {
            host.handle.status().phase == PhaseLabel::PlayingItem
        });
        host.power.set(false);
        wait_until("host paused offline", || {
            host.handle.status().phase == PhaseLabel::PausedOffline
        });

        let follower = spawn_follower(&bus, host_id);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(follower.handle.status().phase, PhaseLabel::Idle);
        assert!(follower.handle.status().current_url.is_none());
    }

    #[test]
    fn skip_propagates_to_followers() {
        let bus = InProcessBus::new();
        let host_id = PeerId::random();
        let host = spawn_host(
            &bus,
            host_id,
            &[
                (URL_A, CDN_A),
                (
                    "https://www.youtube.com/watch?v=abcdefghijk",
                    "https://cdn.example/b.mp4",
                ),
            ],
        );
        let follower = spawn_follower(&bus, host_id);

        host.handle.add(ID_A);
        host.handle.add("https://www.youtube.com/watch?v=abcdefghijk");
        wait_until("both on first stream", || {
            host.handle.status().current_url.as_deref() == Some(CDN_A)
                && follower.handle.status().current_url.as_deref() == Some(CDN_A)
        });

        follower.handle.skip();
        wait_until("both on second stream", || {
            host.handle.status().current_url.as_deref() == Some("https://cdn.example/b.mp4")
                && follower.handle.status().current_url.as_deref()
                    == Some("https://cdn.example/b.mp4")
        });
    }
}
