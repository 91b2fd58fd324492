//! Piece selection and block request policy.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use rand::Rng as _;
use tracing::trace;

use super::active::ActivePiece;
use super::engine::Session;
use crate::constants::BLOCK_SIZE;
use crate::peer::{request_key, Bitfield, Message, PeerState};

impl Session {
    /// Tries to issue one block request to `addr`; returns whether one went
    /// out.
    ///
    /// Active pieces the peer holds come first. Failing that, an unclaimed
    /// piece is adopted and its first block requested. As a last resort the
    /// active pieces are retried in endgame mode, duplicating outstanding
    /// requests to cut tail latency. A peer with nothing left for us gets a
    /// not-interested.
    pub(super) fn request_block(&mut self, addr: SocketAddr) -> bool {
        let total_pieces = self.total_pieces;
        let last_piece_length = self.last_piece_length;
        let standard_length = self.piece_length as u32;
        let Some(peer) = self.peers.get_mut(&addr) else {
            return false;
        };

        if let Some((index, block)) = next_block(&mut self.active_pieces, peer, false) {
            issue_request(peer, total_pieces, last_piece_length, index, block);
            return true;
        }

        if let Some(index) = choose_piece(&self.piece_set, &self.active_pieces, peer, total_pieces)
        {
            let length = if index == total_pieces - 1 {
                last_piece_length
            } else {
                standard_length
            };
            let mut piece = ActivePiece::new(length);
            if let Some(block) = piece.choose_block(false) {
                self.active_pieces.insert(index, piece);
                issue_request(peer, total_pieces, last_piece_length, index, block);
                return true;
            }
        }

        if let Some((index, block)) = next_block(&mut self.active_pieces, peer, true) {
            issue_request(peer, total_pieces, last_piece_length, index, block);
            return true;
        }

        peer.set_interested(false);
        false
    }
}

/// Writes a request for `block` of piece `index` and books it with a
/// timestamp.
///
/// The length is the standard block size, clamped for the final block of the
/// final piece to the bytes that remain.
fn issue_request(
    peer: &mut PeerState,
    total_pieces: u32,
    last_piece_length: u32,
    index: u32,
    block: u32,
) {
    let begin = block * BLOCK_SIZE;
    let mut length = BLOCK_SIZE;
    if index == total_pieces - 1 {
        length = length.min(last_piece_length - begin);
    }
    trace!(peer = %peer.addr, piece = index, block, length, "requesting block");
    peer.our_requests.insert(request_key(index, begin), Instant::now());
    peer.send(&Message::Request {
        index,
        begin,
        length,
    });
}

/// First block available among the active pieces the peer claims to have.
fn next_block(
    active_pieces: &mut HashMap<u32, ActivePiece>,
    peer: &PeerState,
    endgame: bool,
) -> Option<(u32, u32)> {
    for (&index, piece) in active_pieces.iter_mut() {
        if peer.has_piece(index) {
            if let Some(block) = piece.choose_block(endgame) {
                return Some((index, block));
            }
        }
    }
    None
}

/// Picks an unclaimed piece the peer has: a uniformly random starting index,
/// then a wrapping scan for the first piece we lack, they hold, and nobody
/// is fetching yet.
fn choose_piece(
    piece_set: &Bitfield,
    active_pieces: &HashMap<u32, ActivePiece>,
    peer: &PeerState,
    total_pieces: u32,
) -> Option<u32> {
    if total_pieces == 0 {
        return None;
    }
    let start = rand::rng().random_range(0..total_pieces);
    scan_range(piece_set, active_pieces, peer, start, total_pieces)
        .or_else(|| scan_range(piece_set, active_pieces, peer, 0, start))
}

pub(super) fn scan_range(
    piece_set: &Bitfield,
    active_pieces: &HashMap<u32, ActivePiece>,
    peer: &PeerState,
    start: u32,
    end: u32,
) -> Option<u32> {
    (start..end).find(|&index| {
        !piece_set.has(index as usize)
            && peer.has_piece(index)
            && !active_pieces.contains_key(&index)
    })
}
