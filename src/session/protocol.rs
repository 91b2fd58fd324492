//! Interpretation of inbound peer messages against session state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info};

use super::active::ActivePiece;
use super::engine::Session;
use crate::constants::{
    BLOCK_SIZE, MAX_BLOCK_SIZE, MAX_OUR_REQUESTS, MAX_PEER_REQUESTS, REQUEST_TIMEOUT,
};
use crate::peer::{request_key, Bitfield, Message, PeerError, PeerState};

impl Session {
    /// Dispatches one framed message - or the synthetic handshake tail -
    /// from `addr`. Any error closes the peer; its requests go back to the
    /// pool.
    pub(super) async fn handle_message(
        &mut self,
        addr: SocketAddr,
        payload: Bytes,
    ) -> Result<(), PeerError> {
        if self.peers.get(&addr).is_some_and(|peer| peer.id.is_none()) {
            return self.handle_handshake(addr, &payload);
        }

        let message = Message::decode(payload)?;
        if matches!(message, Message::KeepAlive) {
            return Ok(());
        }

        // The bitfield is optional; any other first message fixes the
        // remote's holdings as empty.
        if let Some(peer) = self.peers.get_mut(&addr) {
            if peer.have.is_none() && !matches!(message, Message::Bitfield(_)) {
                peer.have = Some(Bitfield::new(self.total_pieces as usize));
            }
        }

        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                if let Some(peer) = self.peers.get_mut(&addr) {
                    peer.peer_choking = true;
                    Self::release_requests(&mut self.active_pieces, peer);
                }
            }
            Message::Unchoke => {
                if let Some(peer) = self.peers.get_mut(&addr) {
                    peer.peer_choking = false;
                }
                for _ in 0..MAX_OUR_REQUESTS {
                    if !self.request_block(addr) {
                        break;
                    }
                }
            }
            Message::Interested => {
                if let Some(peer) = self.peers.get_mut(&addr) {
                    peer.peer_interested = true;
                }
            }
            Message::NotInterested => {
                if let Some(peer) = self.peers.get_mut(&addr) {
                    peer.peer_interested = false;
                }
            }
            Message::Have { index } => self.handle_have(addr, index)?,
            Message::Bitfield(bits) => self.handle_bitfield(addr, bits)?,
            Message::Request {
                index,
                begin,
                length,
            } => self.handle_request(addr, index, begin, length).await?,
            Message::Piece { index, begin, data } => {
                self.handle_piece(addr, index, begin, data).await?
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => self.handle_cancel(addr, index, begin, length)?,
            // DHT is not implemented; the port announcement is ignored.
            Message::Port(_) => {}
        }
        Ok(())
    }

    /// Validates the synthetic handshake tail: 8 reserved bytes, info hash,
    /// peer id.
    fn handle_handshake(&mut self, addr: SocketAddr, payload: &[u8]) -> Result<(), PeerError> {
        if payload.len() != 48 {
            return Err(PeerError::InvalidHandshake);
        }
        if payload[8..28] != self.metainfo.info_hash.as_bytes()[..] {
            return Err(PeerError::InfoHashMismatch);
        }
        let Some(peer) = self.peers.get_mut(&addr) else {
            return Err(PeerError::ConnectionClosed);
        };
        let mut id = [0u8; 20];
        id.copy_from_slice(&payload[28..48]);
        peer.id = Some(id);
        debug!(peer = %addr, id = %String::from_utf8_lossy(&id), "handshake complete");
        Ok(())
    }

    fn handle_have(&mut self, addr: SocketAddr, index: u32) -> Result<(), PeerError> {
        if index >= self.total_pieces {
            return Err(PeerError::Protocol("have index out of range"));
        }
        let wanted = !self.piece_set.has(index as usize);
        if let Some(peer) = self.peers.get_mut(&addr) {
            if let Some(have) = peer.have.as_mut() {
                have.set(index as usize);
            }
            if wanted && !peer.am_interested {
                peer.set_interested(true);
            }
        }
        Ok(())
    }

    fn handle_bitfield(&mut self, addr: SocketAddr, bits: Bytes) -> Result<(), PeerError> {
        let total = self.total_pieces as usize;
        let Some(peer) = self.peers.get_mut(&addr) else {
            return Ok(());
        };
        if peer.have.is_some() {
            return Err(PeerError::Protocol("late bitfield"));
        }
        let have =
            Bitfield::from_bytes(&bits, total).ok_or(PeerError::Protocol("invalid bitfield"))?;
        peer.have = Some(have);
        self.check_interesting(addr);
        Ok(())
    }

    /// Re-evaluates whether `addr` holds anything we lack, and says so.
    fn check_interesting(&mut self, addr: SocketAddr) {
        let Some(peer) = self.peers.get_mut(&addr) else {
            return;
        };
        let wanted = match peer.have.as_ref() {
            Some(have) => {
                (0..self.total_pieces as usize).any(|i| !self.piece_set.has(i) && have.has(i))
            }
            None => false,
        };
        peer.set_interested(wanted);
    }

    async fn handle_request(
        &mut self,
        addr: SocketAddr,
        index: u32,
        begin: u32,
        length: u32,
    ) -> Result<(), PeerError> {
        let piece_length = self.piece_length;
        if index >= self.total_pieces {
            return Err(PeerError::Protocol("request index out of range"));
        }
        if !self.piece_set.has(index as usize) {
            return Err(PeerError::Protocol("request for a piece we do not have"));
        }
        if u64::from(begin) >= piece_length
            || u64::from(begin) + u64::from(length) > piece_length
        {
            return Err(PeerError::Protocol("request range out of bounds"));
        }
        if length != BLOCK_SIZE {
            return Err(PeerError::Protocol("unexpected request length"));
        }
        self.send_block(addr, index, begin, length).await
    }

    /// Serves one block from the store, unless we are choking the peer.
    async fn send_block(
        &mut self,
        addr: SocketAddr,
        index: u32,
        begin: u32,
        length: u32,
    ) -> Result<(), PeerError> {
        let key = request_key(index, begin);
        {
            let Some(peer) = self.peers.get_mut(&addr) else {
                return Ok(());
            };
            if peer.am_choking {
                return Ok(());
            }
            if peer.peer_requests.len() < MAX_PEER_REQUESTS {
                peer.peer_requests.insert(key);
            }
        }

        let offset = u64::from(index) * self.piece_length + u64::from(begin);
        let data = self.store.read_at(offset, length as usize).await?;
        if let Some(peer) = self.peers.get_mut(&addr) {
            peer.peer_requests.remove(&key);
            peer.send(&Message::Piece { index, begin, data });
            self.info.uploaded += u64::from(length);
        }
        Ok(())
    }

    async fn handle_piece(
        &mut self,
        addr: SocketAddr,
        index: u32,
        begin: u32,
        data: Bytes,
    ) -> Result<(), PeerError> {
        let piece_length = self.piece_length;
        let length = data.len() as u32;
        if index >= self.total_pieces {
            return Err(PeerError::Protocol("piece index out of range"));
        }
        if self.piece_set.has(index as usize) {
            // Already held and hashed; nothing to do.
            return Ok(());
        }
        if u64::from(begin) >= piece_length
            || u64::from(begin) + u64::from(length) > piece_length
        {
            return Err(PeerError::Protocol("piece range out of bounds"));
        }
        if length > MAX_BLOCK_SIZE {
            return Err(PeerError::Protocol("piece payload too large"));
        }

        let offset = u64::from(index) * piece_length + u64::from(begin);
        self.store.write_at(offset, &data).await?;
        self.record_block(addr, index, begin, length);
        self.request_block(addr);
        Ok(())
    }

    fn handle_cancel(
        &mut self,
        addr: SocketAddr,
        index: u32,
        begin: u32,
        length: u32,
    ) -> Result<(), PeerError> {
        let piece_length = self.piece_length;
        if index >= self.total_pieces {
            return Err(PeerError::Protocol("cancel index out of range"));
        }
        if !self.piece_set.has(index as usize) {
            return Err(PeerError::Protocol("cancel for a piece we do not have"));
        }
        if u64::from(begin) >= piece_length
            || u64::from(begin) + u64::from(length) > piece_length
        {
            return Err(PeerError::Protocol("cancel range out of bounds"));
        }
        if length != BLOCK_SIZE {
            return Err(PeerError::Protocol("unexpected cancel length"));
        }
        if let Some(peer) = self.peers.get_mut(&addr) {
            peer.peer_requests.remove(&request_key(index, begin));
        }
        Ok(())
    }

    /// Books a received block: clears the request, calls duplicate fetchers
    /// off, and on completion updates the have set and tells the swarm.
    pub(super) fn record_block(&mut self, addr: SocketAddr, index: u32, begin: u32, length: u32) {
        let key = request_key(index, begin);
        let block = begin / BLOCK_SIZE;
        if let Some(peer) = self.peers.get_mut(&addr) {
            peer.our_requests.remove(&key);
        }
        let Some(piece) = self.active_pieces.get_mut(&index) else {
            debug!(piece = index, block, "block for an inactive piece");
            return;
        };
        let outstanding = piece.record_block(block);
        let complete = piece.is_complete();
        let piece_len = piece.length();

        if outstanding > 1 {
            // Someone else is still fetching this block; call them off.
            for (&other, peer) in self.peers.iter_mut() {
                if other != addr && peer.our_requests.remove(&key).is_some() {
                    peer.send(&Message::Cancel {
                        index,
                        begin,
                        length,
                    });
                }
            }
        }
        self.info.downloaded += u64::from(length);

        if complete {
            self.active_pieces.remove(&index);
            self.info.left -= u64::from(piece_len);
            self.piece_set.set(index as usize);
            self.good_pieces += 1;
            info!(
                piece = index,
                have = self.good_pieces,
                total = self.total_pieces,
                "piece complete"
            );
            for peer in self.peers.values_mut() {
                if peer
                    .have
                    .as_ref()
                    .is_some_and(|have| !have.has(index as usize))
                {
                    peer.send(&Message::Have { index });
                }
            }
        }
    }

    /// Returns every outstanding request of `peer` to its active piece and
    /// clears the book. Used on choke and on close.
    pub(super) fn release_requests(
        active_pieces: &mut HashMap<u32, ActivePiece>,
        peer: &mut PeerState,
    ) {
        for key in peer.our_requests.keys() {
            let index = (*key >> 32) as u32;
            let block = (*key as u32) / BLOCK_SIZE;
            if let Some(piece) = active_pieces.get_mut(&index) {
                piece.release_block(block);
            }
        }
        peer.our_requests.clear();
    }

    /// Times out requests older than the request timeout, returning their
    /// blocks to the pool and dropping the stale entries.
    pub(super) fn check_requests(
        active_pieces: &mut HashMap<u32, ActivePiece>,
        peer: &mut PeerState,
    ) {
        let now = Instant::now();
        peer.our_requests.retain(|key, requested| {
            if now.duration_since(*requested) <= REQUEST_TIMEOUT {
                return true;
            }
            let index = (*key >> 32) as u32;
            let block = (*key as u32) / BLOCK_SIZE;
            debug!(piece = index, block, "request timed out");
            if let Some(piece) = active_pieces.get_mut(&index) {
                piece.release_block(block);
            }
            false
        });
    }
}
