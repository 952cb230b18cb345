//! Shared "now playing" session core.
//!
//! One authoritative host decides what plays; followers mirror it over a
//! small replicated command set. The pieces compose leaf-first: a cyclic
//! [`queue`], the [`normalize`] rules feeding it, an async [`resolve`]
//! worker, a [`player`] seam over the local renderer, and the [`session`]
//! state machine tying them together under a host/follower replication
//! strategy.

pub mod config;
pub mod device;
pub mod events;
pub mod normalize;
pub mod player;
pub mod queue;
pub(crate) mod replicate;
pub mod resolve;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod transport;
