//! tvshare peer — hosts a shared "now playing" session on the console.
//!
//! Runs one authoritative host session with a simulated renderer, plus an
//! optional set of in-process follower sessions mirroring it over the
//! in-process bus. A small line-based console drives the queue:
//!
//! ```text
//! add <url | video id | search terms>
//! skip
//! clear
//! status
//! power on|off
//! quit
//! ```

mod cli;
mod config;

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast::error::TryRecvError;
use tracing_subscriber::EnvFilter;
use tvshare::device::PowerSwitch;
use tvshare::events::SessionEvent;
use tvshare::player::{SimPlayer, SimPlayerConfig};
use tvshare::resolve::{Resolve, spawn_backend_resolver};
use tvshare::session::{Role, Session, SessionHandle, SessionParams, channel};
use tvshare::status::{PhaseLabel, StatusSnapshot};
use tvshare::transport::InProcessBus;
use tvshare_types::PeerId;

use config::PeerConfig;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tvshare=info")),
        )
        .init();

    let peer_config = match &args.config {
        Some(path) => PeerConfig::load(path)?,
        None => PeerConfig::default(),
    };
    let session_config = peer_config.session_config();
    let resolver: Arc<dyn Resolve> = Arc::new(spawn_backend_resolver(peer_config.resolver_config()));

    let bus = InProcessBus::new();
    let power = PowerSwitch::new(!args.powered_off);
    let host_id = PeerId::random();

    let (host_tx, host_rx) = channel();
    let host_endpoint = bus.register(host_id, host_tx.clone());
    let host = Session::spawn(
        SessionParams {
            config: session_config.clone(),
            me: host_id,
            role: Role::Host,
            device: Arc::new(power.clone()),
            player: Box::new(SimPlayer::new(SimPlayerConfig::default())),
            resolver: Some(resolver),
            transport: Box::new(host_endpoint),
        },
        host_tx,
        host_rx,
    );
    tracing::info!(peer = %host_id, "host session started");

    let mut followers = Vec::new();
    for _ in 0..args.followers {
        let me = PeerId::random();
        let (tx, rx) = channel();
        let endpoint = bus.register(me, tx.clone());
        let follower = Session::spawn(
            SessionParams {
                config: session_config.clone(),
                me,
                role: Role::Follower { host: host_id },
                device: Arc::new(PowerSwitch::new(true)),
                player: Box::new(SimPlayer::new(SimPlayerConfig::default())),
                resolver: None,
                transport: Box::new(endpoint),
            },
            tx,
            rx,
        );
        tracing::info!(peer = %me, "follower session started");
        followers.push(follower);
    }

    let _ = ctrlc::set_handler(move || {
        std::process::exit(130);
    });

    spawn_notifier(&host);

    run_console(&host, &followers, &power);

    drop(followers);
    host.shutdown();
    Ok(())
}

/// Print user-visible session events (evictions, faults) on the console.
fn spawn_notifier(host: &SessionHandle) {
    let mut events = host.events().subscribe();
    std::thread::spawn(move || {
        loop {
            match events.try_recv() {
                Ok(SessionEvent::EntryEvicted { reference, error }) => {
                    println!("removed from queue after repeated failures: {reference} ({error})");
                }
                Ok(SessionEvent::PlaybackFault { message }) => {
                    println!("playback fault: {message}");
                }
                Ok(_) => {}
                Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(200)),
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Closed) => break,
            }
        }
    });
}

fn run_console(host: &SessionHandle, followers: &[SessionHandle], power: &PowerSwitch) {
    let stdin = std::io::stdin();
    println!("commands: add <ref> | skip | clear | status | power on|off | quit");
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };
        match command {
            "" => {}
            "add" => {
                if rest.is_empty() {
                    println!("usage: add <url | video id | search terms>");
                } else {
                    host.add(rest);
                    println!("added: {rest}");
                }
            }
            "skip" => {
                host.skip();
                println!("skipped");
            }
            "clear" => {
                let dropped = host.status().queue_len;
                host.clear();
                println!("cleared {dropped}");
            }
            "status" => {
                print_status("host", &host.status());
                for (i, follower) in followers.iter().enumerate() {
                    print_status(&format!("follower {i}"), &follower.status());
                }
            }
            "power" => match rest {
                "on" => {
                    power.set(true);
                    println!("device powered on");
                }
                "off" => {
                    power.set(false);
                    println!("device powered off");
                }
                _ => println!("usage: power on|off"),
            },
            "quit" | "exit" => break,
            other => println!("unknown command: {other}"),
        }
    }
}

fn print_status(who: &str, status: &StatusSnapshot) {
    let phase = match status.phase {
        PhaseLabel::Idle => "idle",
        PhaseLabel::Loading => "loading",
        PhaseLabel::PlayingItem => "playing",
        PhaseLabel::PlayingFallback => "fallback",
        PhaseLabel::PausedOffline => "paused (device off)",
    };
    println!(
        "[{who}] {phase} | device {} | queue {}",
        if status.device_powered_on { "on" } else { "off" },
        status.queue_len,
    );
    if let Some(url) = &status.current_url {
        println!("[{who}]   now: {url} @ {:.1}s", status.position_secs);
    }
    for (i, entry) in status.queue.iter().enumerate() {
        println!("[{who}]   {i}: {entry}");
    }
}
