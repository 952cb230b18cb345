use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a peer on the shared transport.
///
/// Generated once per process; carried implicitly by the transport so the
/// host can answer state requests to the requester only.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs; full uuid is still in Debug.
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Full playback state snapshot sent host -> follower on join/reconciliation.
///
/// Built fresh per request; never mutated after construction. `current_url`
/// is the host-resolved playable URL (what the playback controller was
/// handed), so a late joiner can start playing without resolving anything.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TvState {
    /// Whether the host's rendering device is powered on.
    pub device_powered_on: bool,
    /// `true` while the local fallback clip is looping (empty queue).
    pub is_playing_fallback: bool,
    /// Resolved URL of the current queue item, if one is loaded.
    pub current_url: Option<String>,
    /// Elapsed playback position in seconds; `0.0` unless a queue item is playing.
    pub position_seconds: f64,
    /// Whether playback is currently running (not paused/stopped).
    pub is_playing: bool,
}

/// Playback command broadcast by the host after a successful resolution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlayCommand {
    /// Resolved stream URL.
    pub url: String,
    /// Position to seek to once the stream reports prepared; `0.0` for a
    /// fresh start.
    pub start_seconds: f64,
}

/// Messages replicated between peers, one logical channel per variant.
///
/// The transport is assumed to deliver messages ordered and reliably per
/// sender; none of these payloads carry sequence numbers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum WireMessage {
    /// Queue a raw user reference (follower -> host, then host -> all).
    AddReference { reference: String },
    /// Skip the current item (follower -> host, then host -> all).
    Skip,
    /// Clear the queue (follower -> host, then host -> all).
    Clear,
    /// Host -> all: play a resolved URL.
    Play(PlayCommand),
    /// Host -> all: periodic position heartbeat for drift correction.
    Position { seconds: f64 },
    /// Host -> all: the queue emptied, loop the local fallback clip.
    PlayFallback,
    /// Follower -> host: request a full state snapshot (late join).
    RequestState,
    /// Host -> one follower: full state snapshot reply.
    StateSnapshot(TvState),
}

impl WireMessage {
    /// Logical channel name, used for transport routing and logs.
    pub fn channel(&self) -> &'static str {
        match self {
            WireMessage::AddReference { .. } => "add_reference",
            WireMessage::Skip => "skip",
            WireMessage::Clear => "clear",
            WireMessage::Play(_) => "play",
            WireMessage::Position { .. } => "position",
            WireMessage::PlayFallback => "play_fallback",
            WireMessage::RequestState => "request_state",
            WireMessage::StateSnapshot(_) => "state_snapshot",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_tags_match_channel_names() {
        let messages = vec![
            WireMessage::AddReference {
                reference: "dQw4w9WgXcQ".to_string(),
            },
            WireMessage::Skip,
            WireMessage::Clear,
            WireMessage::Play(PlayCommand {
                url: "https://cdn.example/v.mp4".to_string(),
                start_seconds: 0.0,
            }),
            WireMessage::Position { seconds: 12.5 },
            WireMessage::PlayFallback,
            WireMessage::RequestState,
            WireMessage::StateSnapshot(TvState::default()),
        ];
        for msg in messages {
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["channel"], msg.channel());
            let back: WireMessage = serde_json::from_value(json).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn tv_state_round_trips() {
        let state = TvState {
            device_powered_on: true,
            is_playing_fallback: false,
            current_url: Some("https://cdn.example/v.mp4".to_string()),
            position_seconds: 42.25,
            is_playing: true,
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: TvState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
