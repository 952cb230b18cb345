//! Peer-to-peer message transport seam.
//!
//! The real transport (ordered, reliable, at-least-once per named channel,
//! with peer identity) lives outside this crate. [`InProcessBus`] is the
//! in-process implementation used by the peer binary and the scenario
//! tests; it serde-round-trips every payload so anything that would not
//! survive the wire fails loudly here too.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use tvshare_types::{PeerId, WireMessage};

use crate::session::SessionMsg;

#[derive(Debug)]
pub enum TransportError {
    /// The payload could not be encoded.
    Encode(String),
    /// The target peer is not registered on the bus.
    UnknownPeer(PeerId),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Encode(reason) => write!(f, "encode wire message: {reason}"),
            TransportError::UnknownPeer(peer) => write!(f, "unknown peer {peer}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outbound side of the transport, bound to one peer identity.
///
/// Deliveries to the sending peer itself are suppressed: a host applies a
/// command once, locally, and never re-applies its own broadcast.
pub trait Transport: Send {
    fn broadcast(&self, message: &WireMessage) -> Result<(), TransportError>;
    fn send_to(&self, peer: PeerId, message: &WireMessage) -> Result<(), TransportError>;
}

type PeerInboxes = Arc<Mutex<HashMap<PeerId, Sender<SessionMsg>>>>;

/// Shared in-process bus. Register each peer's session inbox to get a
/// [`Transport`] endpoint bound to that peer.
#[derive(Clone, Default)]
pub struct InProcessBus {
    peers: PeerInboxes,
}

/// One peer's endpoint on the bus.
pub struct BusEndpoint {
    peers: PeerInboxes,
    me: PeerId,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer's inbox and return its endpoint.
    pub fn register(&self, peer: PeerId, inbox: Sender<SessionMsg>) -> BusEndpoint {
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(peer, inbox);
        }
        BusEndpoint {
            peers: self.peers.clone(),
            me: peer,
        }
    }

    /// Drop a peer's registration (disconnect).
    pub fn unregister(&self, peer: PeerId) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(&peer);
        }
    }
}

impl BusEndpoint {
    fn encode(message: &WireMessage) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(message).map_err(|e| TransportError::Encode(e.to_string()))
    }

    fn deliver(&self, inbox: &Sender<SessionMsg>, peer: PeerId, bytes: &[u8]) {
        let decoded: WireMessage = match serde_json::from_slice(bytes) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable wire message");
                return;
            }
        };
        if inbox
            .send(SessionMsg::Wire {
                from: self.me,
                message: decoded,
            })
            .is_err()
        {
            tracing::debug!(peer = %peer, "peer inbox closed; dropping delivery");
        }
    }
}

impl Transport for BusEndpoint {
    fn broadcast(&self, message: &WireMessage) -> Result<(), TransportError> {
        let bytes = Self::encode(message)?;
        let targets: Vec<(PeerId, Sender<SessionMsg>)> = match self.peers.lock() {
            Ok(peers) => peers
                .iter()
                .filter(|(id, _)| **id != self.me)
                .map(|(id, tx)| (*id, tx.clone()))
                .collect(),
            Err(_) => Vec::new(),
        };
        tracing::trace!(channel = message.channel(), peers = targets.len(), "broadcast");
        for (peer, inbox) in targets {
            self.deliver(&inbox, peer, &bytes);
        }
        Ok(())
    }

    fn send_to(&self, peer: PeerId, message: &WireMessage) -> Result<(), TransportError> {
        let bytes = Self::encode(message)?;
        let inbox = match self.peers.lock() {
            Ok(peers) => peers.get(&peer).cloned(),
            Err(_) => None,
        };
        let Some(inbox) = inbox else {
            return Err(TransportError::UnknownPeer(peer));
        };
        tracing::trace!(channel = message.channel(), peer = %peer, "send");
        self.deliver(&inbox, peer, &bytes);
        Ok(())
    }
}
