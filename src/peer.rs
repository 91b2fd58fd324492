//! Peer wire protocol.
//!
//! The message codec, the per-connection protocol state, and the pair of
//! tasks that move frames between a socket and the session's event loop.

mod bitfield;
mod error;
mod io;
mod message;
mod peer_id;
mod state;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use io::{spawn_peer_tasks, PeerMessage};
pub use message::{Handshake, Message, HANDSHAKE_LEN};
pub use peer_id::PeerId;
pub use state::{request_key, PeerState, RequestKey};

#[cfg(test)]
mod tests;
