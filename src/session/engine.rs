use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::active::ActivePiece;
use super::error::SessionError;
use super::info::{Config, SessionInfo};
use super::verify;
use crate::constants::{
    KEEPALIVE_INTERVAL, PEER_IDLE_TIMEOUT, RECHOKE_INTERVAL, TRACKER_INITIAL_INTERVAL,
    TRACKER_MAX_INTERVAL, TRACKER_MIN_INTERVAL,
};
use crate::metainfo::Metainfo;
use crate::peer::{spawn_peer_tasks, Bitfield, Handshake, PeerId, PeerMessage, PeerState};
use crate::storage::FileStore;
use crate::tracker::{AnnounceResponse, HttpTracker, TrackerEvent};
use crate::upnp;

/// One turn of the event loop.
enum Event {
    Retracker,
    Tracker(AnnounceResponse),
    Message(PeerMessage),
    Connection(TcpStream),
    Rechoke,
    KeepAlive,
}

/// The swarm engine for one torrent.
///
/// All session state lives here and is mutated only from [`Session::run`]'s
/// event loop, so no state needs locking. Peer I/O happens in the per-peer
/// tasks; they talk to the loop exclusively through channels.
pub struct Session {
    pub(super) metainfo: Metainfo,
    pub(super) info: SessionInfo,
    pub(super) store: FileStore,
    pub(super) peers: HashMap<SocketAddr, PeerState>,
    /// The pieces we hold, verified at startup or completed since.
    pub(super) piece_set: Bitfield,
    /// Pieces currently being fetched.
    pub(super) active_pieces: HashMap<u32, ActivePiece>,
    pub(super) total_pieces: u32,
    pub(super) piece_length: u64,
    pub(super) last_piece_length: u32,
    pub(super) good_pieces: u32,
    pub(super) tracker: Arc<HttpTracker>,
    pub(super) tracker_state: Option<AnnounceResponse>,
    pub(super) inbound_tx: mpsc::Sender<PeerMessage>,
    pub(super) inbound_rx: mpsc::Receiver<PeerMessage>,
    pub(super) conn_tx: mpsc::Sender<TcpStream>,
    pub(super) conn_rx: mpsc::Receiver<TcpStream>,
    pub(super) tracker_tx: mpsc::Sender<AnnounceResponse>,
    pub(super) tracker_rx: mpsc::Receiver<AnnounceResponse>,
    pub(super) listener: Option<TcpListener>,
}

impl Session {
    /// Builds the file store, scans existing pieces, maps and binds the
    /// listen port and sets up the event channels. The loop itself starts
    /// with [`Session::run`].
    pub async fn new(metainfo: Metainfo, config: Config) -> Result<Self, SessionError> {
        let store = FileStore::open(&config.file_dir, &metainfo.info.files).await?;
        let total_size = store.total_length();
        let piece_length = metainfo.info.piece_length;
        let total_pieces = metainfo.info.pieces.len() as u32;
        // The final piece is only short when the total is not a multiple of
        // the piece length.
        let last_piece_length = match total_size % piece_length {
            0 => piece_length as u32,
            short => short as u32,
        };

        info!(name = %metainfo.info.name, pieces = total_pieces, "checking existing pieces");
        let scan = verify::check_pieces(&store, &metainfo.info).await?;

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
        let port = listener.local_addr()?.port();
        if config.use_upnp {
            upnp::forward_port(port).await?;
        }
        info!(port, "listening for peers");

        let mut left = scan.bad as u64 * piece_length;
        if total_pieces > 0 && !scan.have.has(total_pieces as usize - 1) {
            left = left - piece_length + u64::from(last_piece_length);
        }

        let tracker = Arc::new(HttpTracker::new(&metainfo.announce)?);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (conn_tx, conn_rx) = mpsc::channel(16);
        let (tracker_tx, tracker_rx) = mpsc::channel(4);

        Ok(Self {
            info: SessionInfo {
                peer_id: PeerId::generate(),
                port,
                uploaded: 0,
                downloaded: 0,
                left,
            },
            store,
            peers: HashMap::new(),
            piece_set: scan.have,
            active_pieces: HashMap::new(),
            total_pieces,
            piece_length,
            last_piece_length,
            good_pieces: scan.good,
            tracker,
            tracker_state: None,
            inbound_tx,
            inbound_rx,
            conn_tx,
            conn_rx,
            tracker_tx,
            tracker_rx,
            listener: Some(listener),
            metainfo,
        })
    }

    /// Runs the event loop. It never returns on its own; shutdown is by
    /// external signal.
    pub async fn run(mut self) {
        if let Some(listener) = self.listener.take() {
            tokio::spawn(accept_loop(listener, self.conn_tx.clone()));
        }

        let mut retracker = tick(TRACKER_INITIAL_INTERVAL);
        let mut rechoke = tick(RECHOKE_INTERVAL);
        let mut keepalive = tick(KEEPALIVE_INTERVAL);

        self.announce();

        loop {
            let event = tokio::select! {
                _ = retracker.tick() => Event::Retracker,
                Some(response) = self.tracker_rx.recv() => Event::Tracker(response),
                Some(message) = self.inbound_rx.recv() => Event::Message(message),
                Some(stream) = self.conn_rx.recv() => Event::Connection(stream),
                _ = rechoke.tick() => Event::Rechoke,
                _ = keepalive.tick() => Event::KeepAlive,
            };
            match event {
                Event::Retracker => self.announce(),
                Event::Tracker(response) => {
                    let interval = self.apply_tracker_response(response);
                    retracker = tick(interval);
                }
                Event::Message(message) => self.dispatch(message).await,
                Event::Connection(stream) => self.add_peer(stream),
                Event::Rechoke => {
                    // TODO: pick peers to choke and unchoke from transfer rates.
                    debug!(
                        peers = self.peers.len(),
                        downloaded = self.info.downloaded,
                        "swarm stats"
                    );
                }
                Event::KeepAlive => self.sweep_peers(),
            }
        }
    }

    /// Kicks off an asynchronous announce; a response, if one comes, lands
    /// on the tracker channel. Failures only cost us this round.
    pub(super) fn announce(&self) {
        let tracker = self.tracker.clone();
        let tx = self.tracker_tx.clone();
        let event = if self.tracker_state.is_none() {
            TrackerEvent::Started
        } else {
            TrackerEvent::None
        };
        let info_hash = *self.metainfo.info_hash.as_bytes();
        let peer_id = *self.info.peer_id.as_bytes();
        let (port, uploaded, downloaded, left) = (
            self.info.port,
            self.info.uploaded,
            self.info.downloaded,
            self.info.left,
        );
        info!(uploaded, downloaded, left, "announcing to tracker");
        tokio::spawn(async move {
            match tracker
                .announce(&info_hash, &peer_id, port, uploaded, downloaded, left, event)
                .await
            {
                Ok(response) => {
                    let _ = tx.send(response).await;
                }
                Err(err) => warn!(error = %err, "tracker announce failed"),
            }
        });
    }

    /// Dials any peers we do not know yet and returns the clamped
    /// re-announce interval.
    pub(super) fn apply_tracker_response(&mut self, response: AnnounceResponse) -> Duration {
        info!(
            seeders = response.complete,
            leechers = response.incomplete,
            peers = response.peers.len(),
            "tracker response"
        );
        for &addr in &response.peers {
            if !self.peers.contains_key(&addr) {
                let tx = self.conn_tx.clone();
                tokio::spawn(async move {
                    match TcpStream::connect(addr).await {
                        Ok(stream) => {
                            let _ = tx.send(stream).await;
                        }
                        Err(err) => debug!(peer = %addr, error = %err, "dial failed"),
                    }
                });
            }
        }
        let interval =
            u64::from(response.interval).clamp(TRACKER_MIN_INTERVAL, TRACKER_MAX_INTERVAL);
        self.tracker_state = Some(response);
        Duration::from_secs(interval)
    }

    /// Registers a fresh connection and spawns its I/O tasks. Our handshake
    /// goes out immediately, followed by an unconditional unchoke.
    pub(super) fn add_peer(&mut self, stream: TcpStream) {
        let addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(err) => {
                debug!(error = %err, "dropping connection without an address");
                return;
            }
        };
        if self.peers.contains_key(&addr) {
            debug!(peer = %addr, "already connected");
            return;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handshake = Handshake::new(
            *self.metainfo.info_hash.as_bytes(),
            *self.info.peer_id.as_bytes(),
        )
        .encode();
        spawn_peer_tasks(
            stream,
            addr,
            handshake,
            self.inbound_tx.clone(),
            outbound_rx,
            shutdown_rx,
        );

        let mut peer = PeerState::new(addr, outbound_tx, shutdown_tx);
        // Until the rechoke tick grows a policy, everyone gets unchoked.
        peer.set_choke(false);
        self.peers.insert(addr, peer);
        debug!(peer = %addr, peers = self.peers.len(), "peer added");
    }

    /// Routes one inbound envelope through the protocol handler, closing the
    /// peer on a violation or on the reader's end-of-stream sentinel.
    pub(super) async fn dispatch(&mut self, message: PeerMessage) {
        let PeerMessage { addr, payload } = message;
        let Some(payload) = payload else {
            debug!(peer = %addr, "reader finished");
            self.close_peer(addr);
            return;
        };
        let Some(peer) = self.peers.get_mut(&addr) else {
            return;
        };
        peer.last_read = Instant::now();
        if let Err(err) = self.handle_message(addr, payload).await {
            debug!(peer = %addr, error = %err, "closing peer");
            self.close_peer(addr);
        }
    }

    /// Removes the peer, returning its outstanding requests to their active
    /// pieces, and shuts its I/O tasks down.
    pub(super) fn close_peer(&mut self, addr: SocketAddr) {
        let Some(mut peer) = self.peers.remove(&addr) else {
            return;
        };
        Self::release_requests(&mut self.active_pieces, &mut peer);
        peer.close();
    }

    /// Keep-alive sweep: drops idle peers, times out stale requests and
    /// pings quiet-but-healthy connections.
    pub(super) fn sweep_peers(&mut self) {
        let idle: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.last_read.elapsed() > PEER_IDLE_TIMEOUT)
            .map(|(&addr, _)| addr)
            .collect();
        for addr in idle {
            debug!(peer = %addr, "dropping idle peer");
            self.close_peer(addr);
        }

        for peer in self.peers.values_mut() {
            Self::check_requests(&mut self.active_pieces, peer);
            peer.keep_alive();
        }
    }
}

fn tick(period: Duration) -> Interval {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn accept_loop(listener: TcpListener, conn_tx: mpsc::Sender<TcpStream>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(peer = %addr, "incoming connection");
                if conn_tx.send(stream).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
