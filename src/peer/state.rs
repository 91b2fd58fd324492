use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use super::bitfield::Bitfield;
use super::message::Message;
use crate::constants::{KEEPALIVE_AFTER, MAX_OUR_REQUESTS};

/// Key identifying a block request: `piece << 32 | begin`.
pub type RequestKey = u64;

pub fn request_key(index: u32, begin: u32) -> RequestKey {
    (index as u64) << 32 | begin as u64
}

/// Protocol state for one remote peer.
///
/// Owned and mutated only by the session task; the reader and writer tasks
/// see nothing but their channels.
pub struct PeerState {
    pub addr: SocketAddr,
    /// Remote peer id, filled in when the handshake arrives.
    pub id: Option<[u8; 20]>,
    /// Pieces the remote claims to have. `None` until its bitfield, or any
    /// other post-handshake message, arrives.
    pub have: Option<Bitfield>,
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
    /// Blocks the remote asked us for.
    pub peer_requests: HashSet<RequestKey>,
    /// Blocks we asked the remote for, with the time of each request.
    pub our_requests: HashMap<RequestKey, Instant>,
    pub last_read: Instant,
    pub last_write: Instant,
    outbound: mpsc::UnboundedSender<Bytes>,
    shutdown: watch::Sender<bool>,
}

impl PeerState {
    pub fn new(
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Bytes>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        let now = Instant::now();
        Self {
            addr,
            id: None,
            have: None,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            peer_requests: HashSet::new(),
            our_requests: HashMap::with_capacity(MAX_OUR_REQUESTS),
            last_read: now,
            last_write: now,
            outbound,
            shutdown,
        }
    }

    /// Queues a message for the writer task and stamps the write time.
    pub fn send(&mut self, message: &Message) {
        let _ = self.outbound.send(message.encode());
        self.last_write = Instant::now();
    }

    /// Sends choke or unchoke, on transition only. Choking forgets every
    /// request the remote had pending with us.
    pub fn set_choke(&mut self, choke: bool) {
        if choke == self.am_choking {
            return;
        }
        self.am_choking = choke;
        if choke {
            self.peer_requests.clear();
            self.send(&Message::Choke);
        } else {
            self.send(&Message::Unchoke);
        }
    }

    /// Sends interested or not-interested, on transition only.
    pub fn set_interested(&mut self, interested: bool) {
        if interested == self.am_interested {
            return;
        }
        self.am_interested = interested;
        let message = if interested {
            Message::Interested
        } else {
            Message::NotInterested
        };
        self.send(&message);
    }

    /// Sends an empty keep-alive if nothing was written recently.
    pub fn keep_alive(&mut self) {
        if self.last_write.elapsed() >= KEEPALIVE_AFTER {
            self.send(&Message::KeepAlive);
        }
    }

    /// `true` if the remote claims to have `index`.
    pub fn has_piece(&self, index: u32) -> bool {
        self.have.as_ref().is_some_and(|have| have.has(index as usize))
    }

    /// Tears the connection down: both I/O tasks exit and drop their socket
    /// halves. Idempotent.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}
