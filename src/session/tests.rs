use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use super::scheduler::scan_range;
use super::*;
use crate::constants::BLOCK_SIZE;
use crate::metainfo::{FileInfo, Info, InfoHash, Metainfo};
use crate::peer::{request_key, Message, PeerMessage, PeerState};

// ---------------------------------------------------------------------------
// ActivePiece

#[test]
fn active_piece_normal_mode_is_deterministic() {
    let mut piece = ActivePiece::new(4 * BLOCK_SIZE);
    assert_eq!(piece.choose_block(false), Some(0));
    assert_eq!(piece.choose_block(false), Some(1));
    assert_eq!(piece.choose_block(false), Some(2));
    assert_eq!(piece.choose_block(false), Some(3));
    // Everything outstanding: normal mode has nothing left.
    assert_eq!(piece.choose_block(false), None);
}

#[test]
fn active_piece_endgame_prefers_fewest_requests() {
    let mut piece = ActivePiece::new(3 * BLOCK_SIZE);
    assert_eq!(piece.choose_block(false), Some(0));
    assert_eq!(piece.choose_block(false), Some(1));
    piece.record_block(1);

    // Counters are now [1, -1, 0]; endgame takes the untouched block first.
    assert_eq!(piece.choose_block(true), Some(2));
    // Tie between 0 and 2 at one request each: lowest index wins.
    assert_eq!(piece.choose_block(true), Some(0));
    assert_eq!(piece.choose_block(true), Some(2));
}

#[test]
fn active_piece_endgame_skips_received_blocks() {
    let mut piece = ActivePiece::new(2 * BLOCK_SIZE);
    piece.record_block(0);
    piece.record_block(1);
    assert_eq!(piece.choose_block(true), None);
    assert!(piece.is_complete());
}

#[test]
fn active_piece_record_returns_outstanding_count() {
    let mut piece = ActivePiece::new(2 * BLOCK_SIZE);
    assert_eq!(piece.choose_block(false), Some(0));
    assert_eq!(piece.choose_block(true), Some(0));
    assert_eq!(piece.record_block(0), 2);
    // Receiving again reports the terminal marker.
    assert_eq!(piece.record_block(0), -1);
    assert!(!piece.is_complete());
}

#[test]
fn active_piece_release_never_underflows_or_resurrects() {
    let mut piece = ActivePiece::new(2 * BLOCK_SIZE);
    piece.choose_block(false);
    piece.record_block(1);

    piece.release_block(0);
    piece.release_block(0);
    // Back to unrequested, not negative: normal mode hands it out again.
    assert_eq!(piece.choose_block(false), Some(0));

    piece.release_block(1);
    assert_eq!(piece.record_block(1), -1);
}

#[test]
fn short_final_piece_has_fewer_blocks() {
    let mut piece = ActivePiece::new(BLOCK_SIZE / 2);
    assert_eq!(piece.choose_block(false), Some(0));
    assert_eq!(piece.choose_block(false), None);
}

// ---------------------------------------------------------------------------
// Session helpers

fn bogus_digests(count: usize) -> Vec<[u8; 20]> {
    (0..count).map(|i| [i as u8 + 1; 20]).collect()
}

fn content_digests(content: &[u8], piece_length: usize) -> Vec<[u8; 20]> {
    content
        .chunks(piece_length)
        .map(|chunk| Sha1::digest(chunk).into())
        .collect()
}

fn test_metainfo(piece_length: u64, total: u64, pieces: Vec<[u8; 20]>) -> Metainfo {
    Metainfo {
        info: Info {
            name: "payload.bin".to_string(),
            piece_length,
            pieces,
            files: vec![FileInfo {
                path: PathBuf::from("payload.bin"),
                length: total,
            }],
            total_length: total,
        },
        info_hash: InfoHash([7u8; 20]),
        announce: "http://127.0.0.1:1/announce".to_string(),
        comment: None,
    }
}

async fn test_session(piece_length: u64, total: u64, pieces: Vec<[u8; 20]>) -> (Session, TempDir) {
    let temp = TempDir::new().unwrap();
    let config = Config {
        file_dir: temp.path().to_path_buf(),
        port: 0,
        use_upnp: false,
    };
    let session = Session::new(test_metainfo(piece_length, total, pieces), config)
        .await
        .unwrap();
    (session, temp)
}

fn add_test_peer(session: &mut Session, tag: u16) -> (SocketAddr, mpsc::UnboundedReceiver<Bytes>) {
    let addr = SocketAddr::from(([127, 0, 1, 1], tag));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, _) = watch::channel(false);
    session
        .peers
        .insert(addr, PeerState::new(addr, outbound_tx, shutdown_tx));
    (addr, outbound_rx)
}

async fn deliver(session: &mut Session, addr: SocketAddr, payload: Bytes) {
    session
        .dispatch(PeerMessage {
            addr,
            payload: Some(payload),
        })
        .await;
}

async fn shake(session: &mut Session, addr: SocketAddr) {
    let mut tail = vec![0u8; 8];
    tail.extend_from_slice(session.metainfo.info_hash.as_bytes());
    tail.extend_from_slice(b"-XX0001-abcdefghijkl");
    deliver(session, addr, tail.into()).await;
}

fn frames(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<Bytes> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(frame);
    }
    out
}

fn parse_request(frame: &[u8]) -> (u32, u32, u32) {
    assert_eq!(frame[0], 6, "not a request frame");
    parse_triple(frame)
}

fn parse_cancel(frame: &[u8]) -> (u32, u32, u32) {
    assert_eq!(frame[0], 8, "not a cancel frame");
    parse_triple(frame)
}

fn parse_triple(frame: &[u8]) -> (u32, u32, u32) {
    assert_eq!(frame.len(), 13);
    let field = |i: usize| u32::from_be_bytes(frame[i..i + 4].try_into().unwrap());
    (field(1), field(5), field(9))
}

// ---------------------------------------------------------------------------
// Resumption scenarios

#[tokio::test]
async fn empty_torrent_creates_files_and_counts_everything_left() {
    // Four pieces of 16 KiB with a short 8 KiB tail.
    let total: u64 = 3 * 16384 + 8192;
    let (session, temp) = test_session(16384, total, bogus_digests(4)).await;

    let metadata = std::fs::metadata(temp.path().join("payload.bin")).unwrap();
    assert_eq!(metadata.len(), total);

    assert_eq!(session.good_pieces, 0);
    assert_eq!(session.piece_set.count_ones(), 0);
    assert_eq!(session.info.left, total);
    assert_eq!(session.last_piece_length, 8192);
}

#[tokio::test]
async fn full_torrent_resumes_with_nothing_left() {
    let total = 3 * 16384 + 8192;
    let content: Vec<u8> = (0..total).map(|i| (i * 7 % 251) as u8).collect();

    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("payload.bin"), &content).unwrap();

    let metainfo = test_metainfo(16384, total as u64, content_digests(&content, 16384));
    let config = Config {
        file_dir: temp.path().to_path_buf(),
        port: 0,
        use_upnp: false,
    };
    let session = Session::new(metainfo, config).await.unwrap();

    assert_eq!(session.good_pieces, 4);
    assert_eq!(session.piece_set.count_ones(), 4);
    assert_eq!(session.info.left, 0);
    // The first announce still carries event=started.
    assert!(session.tracker_state.is_none());
}

#[tokio::test]
async fn corrupting_one_piece_clears_exactly_its_bit() {
    let total = 4 * 8192;
    let mut content: Vec<u8> = (0..total).map(|i| (i * 3 % 256) as u8).collect();
    let digests = content_digests(&content, 8192);

    // Flip one byte inside piece 2.
    content[2 * 8192 + 100] ^= 0xFF;

    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("payload.bin"), &content).unwrap();

    let metainfo = test_metainfo(8192, total as u64, digests);
    let store = crate::storage::FileStore::open(temp.path(), &metainfo.info.files)
        .await
        .unwrap();
    let scan = check_pieces(&store, &metainfo.info).await.unwrap();

    assert_eq!(scan.good, 3);
    assert_eq!(scan.bad, 1);
    assert!(scan.have.has(0));
    assert!(scan.have.has(1));
    assert!(!scan.have.has(2));
    assert!(scan.have.has(3));
}

#[tokio::test]
async fn exact_multiple_normalises_last_piece_length() {
    let (session, _temp) = test_session(16384, 2 * 16384, bogus_digests(2)).await;
    assert_eq!(session.last_piece_length, 16384);
    assert_eq!(session.info.left, 2 * 16384);
}

// ---------------------------------------------------------------------------
// Handshake

#[tokio::test]
async fn handshake_mismatch_removes_the_peer() {
    let (mut session, _temp) = test_session(16384, 16384, bogus_digests(1)).await;
    let (addr, _rx) = add_test_peer(&mut session, 1);

    let mut tail = vec![0u8; 8];
    tail.extend_from_slice(&[0xBAu8; 20]);
    tail.extend_from_slice(b"-XX0001-abcdefghijkl");
    deliver(&mut session, addr, tail.into()).await;

    assert!(!session.peers.contains_key(&addr));
}

#[tokio::test]
async fn handshake_records_the_peer_id() {
    let (mut session, _temp) = test_session(16384, 16384, bogus_digests(1)).await;
    let (addr, _rx) = add_test_peer(&mut session, 1);

    shake(&mut session, addr).await;

    let peer = &session.peers[&addr];
    assert_eq!(peer.id.as_ref().map(|id| &id[..8]), Some(&b"-XX0001-"[..]));
    // No bitfield yet: holdings are still unknown.
    assert!(peer.have.is_none());
}

// ---------------------------------------------------------------------------
// Interest

#[tokio::test]
async fn bitfield_triggers_interest_once() {
    let (mut session, _temp) = test_session(16384, 4 * 16384, bogus_digests(4)).await;
    let (addr, mut rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;

    // The peer advertises only piece 0, which we lack.
    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x80])).encode(),
    )
    .await;
    assert_eq!(frames(&mut rx), vec![Message::Interested.encode()]);
    assert!(session.peers[&addr].am_interested);

    // A have for another piece we lack does not repeat the declaration.
    deliver(&mut session, addr, Message::Have { index: 1 }.encode()).await;
    assert!(frames(&mut rx).is_empty());
    assert!(session.peers[&addr].am_interested);
    assert!(session.peers[&addr].has_piece(1));
}

#[tokio::test]
async fn keep_alive_changes_nothing() {
    let (mut session, _temp) = test_session(16384, 16384, bogus_digests(1)).await;
    let (addr, mut rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;

    deliver(&mut session, addr, Bytes::new()).await;

    assert!(session.peers.contains_key(&addr));
    // A keep-alive is not a real message: holdings stay unknown.
    assert!(session.peers[&addr].have.is_none());
    assert!(frames(&mut rx).is_empty());
}

#[tokio::test]
async fn late_bitfield_closes_the_peer() {
    let (mut session, _temp) = test_session(16384, 16384, bogus_digests(1)).await;
    let (addr, _rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;

    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x80])).encode(),
    )
    .await;
    assert!(session.peers.contains_key(&addr));

    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x80])).encode(),
    )
    .await;
    assert!(!session.peers.contains_key(&addr));
}

#[tokio::test]
async fn have_out_of_range_closes_the_peer() {
    let (mut session, _temp) = test_session(16384, 4 * 16384, bogus_digests(4)).await;
    let (addr, _rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;

    deliver(&mut session, addr, Message::Have { index: 4 }.encode()).await;
    assert!(!session.peers.contains_key(&addr));
}

#[tokio::test]
async fn unknown_opcode_closes_the_peer() {
    let (mut session, _temp) = test_session(16384, 16384, bogus_digests(1)).await;
    let (addr, _rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;

    deliver(&mut session, addr, Bytes::from_static(&[42])).await;
    assert!(!session.peers.contains_key(&addr));
}

// ---------------------------------------------------------------------------
// Scheduling

#[tokio::test]
async fn unchoke_pipelines_two_requests() {
    // One piece of four blocks.
    let (mut session, _temp) = test_session(4 * 16384, 4 * 16384, bogus_digests(1)).await;
    let (addr, mut rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;
    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x80])).encode(),
    )
    .await;
    frames(&mut rx); // interested

    deliver(&mut session, addr, Message::Unchoke.encode()).await;

    let sent = frames(&mut rx);
    assert_eq!(sent.len(), 2);
    assert_eq!(parse_request(&sent[0]), (0, 0, BLOCK_SIZE));
    assert_eq!(parse_request(&sent[1]), (0, BLOCK_SIZE, BLOCK_SIZE));
    assert_eq!(session.peers[&addr].our_requests.len(), 2);
    assert!(session.active_pieces.contains_key(&0));
}

#[tokio::test]
async fn final_block_of_final_piece_is_clamped() {
    // Four pieces of 16 KiB, the last only 8 KiB; the peer has just the last.
    let total = 3 * 16384 + 8192;
    let (mut session, _temp) = test_session(16384, total, bogus_digests(4)).await;
    let (addr, mut rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;
    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x10])).encode(),
    )
    .await;
    frames(&mut rx); // interested

    deliver(&mut session, addr, Message::Unchoke.encode()).await;

    let sent = frames(&mut rx);
    assert!(!sent.is_empty());
    assert_eq!(parse_request(&sent[0]), (3, 0, 8192));
}

#[tokio::test]
async fn choke_returns_requests_to_the_pool() {
    let (mut session, _temp) = test_session(2 * 16384, 2 * 16384, bogus_digests(1)).await;
    let (addr, mut rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;
    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x80])).encode(),
    )
    .await;
    deliver(&mut session, addr, Message::Unchoke.encode()).await;
    frames(&mut rx);
    assert_eq!(session.peers[&addr].our_requests.len(), 2);

    deliver(&mut session, addr, Message::Choke.encode()).await;
    assert!(session.peers[&addr].peer_choking);
    assert!(session.peers[&addr].our_requests.is_empty());

    // Both blocks are unrequested again: a fresh unchoke re-requests them in
    // normal mode, in order.
    deliver(&mut session, addr, Message::Unchoke.encode()).await;
    let sent = frames(&mut rx);
    assert_eq!(sent.len(), 2);
    assert_eq!(parse_request(&sent[0]), (0, 0, BLOCK_SIZE));
    assert_eq!(parse_request(&sent[1]), (0, BLOCK_SIZE, BLOCK_SIZE));
}

#[tokio::test]
async fn endgame_duplicates_and_cancels_the_loser() {
    // One piece, two blocks, both peers advertise it.
    let (mut session, _temp) = test_session(2 * 16384, 2 * 16384, bogus_digests(1)).await;
    let (peer_a, mut rx_a) = add_test_peer(&mut session, 1);
    let (peer_b, mut rx_b) = add_test_peer(&mut session, 2);
    for &addr in &[peer_a, peer_b] {
        shake(&mut session, addr).await;
        deliver(
            &mut session,
            addr,
            Message::Bitfield(Bytes::from_static(&[0x80])).encode(),
        )
        .await;
    }
    frames(&mut rx_a);
    frames(&mut rx_b);

    // A claims both blocks.
    deliver(&mut session, peer_a, Message::Unchoke.encode()).await;
    assert_eq!(frames(&mut rx_a).len(), 2);

    // B has nothing fresh: endgame hands it the same two blocks.
    deliver(&mut session, peer_b, Message::Unchoke.encode()).await;
    let sent_b = frames(&mut rx_b);
    assert_eq!(sent_b.len(), 2);
    assert_eq!(parse_request(&sent_b[0]), (0, 0, BLOCK_SIZE));
    assert_eq!(parse_request(&sent_b[1]), (0, BLOCK_SIZE, BLOCK_SIZE));

    // B wins the race for block 0: A gets a cancel for it.
    deliver(
        &mut session,
        peer_b,
        Message::Piece {
            index: 0,
            begin: 0,
            data: Bytes::from(vec![0u8; BLOCK_SIZE as usize]),
        }
        .encode(),
    )
    .await;
    let sent_a = frames(&mut rx_a);
    assert_eq!(sent_a.len(), 1);
    assert_eq!(parse_cancel(&sent_a[0]), (0, 0, BLOCK_SIZE));
    assert!(!session.peers[&peer_a]
        .our_requests
        .contains_key(&request_key(0, 0)));

    // B wins block 1 as well: cancel again, and the piece completes.
    deliver(
        &mut session,
        peer_b,
        Message::Piece {
            index: 0,
            begin: BLOCK_SIZE,
            data: Bytes::from(vec![0u8; BLOCK_SIZE as usize]),
        }
        .encode(),
    )
    .await;
    let sent_a = frames(&mut rx_a);
    assert_eq!(sent_a.len(), 1);
    assert_eq!(parse_cancel(&sent_a[0]), (0, BLOCK_SIZE, BLOCK_SIZE));

    assert!(session.piece_set.has(0));
    assert!(session.active_pieces.is_empty());
    assert_eq!(session.good_pieces, 1);
    assert_eq!(session.info.left, 0);
    assert_eq!(session.info.downloaded, 2 * u64::from(BLOCK_SIZE));
}

#[tokio::test]
async fn scan_range_takes_the_first_wanted_inactive_piece() {
    let (mut session, _temp) = test_session(16384, 8 * 16384, bogus_digests(8)).await;
    let (addr, _rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;
    // The peer holds pieces 2 and 3.
    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x30])).encode(),
    )
    .await;

    session.active_pieces.insert(2, ActivePiece::new(16384));
    session.piece_set.set(0);

    let peer = &session.peers[&addr];
    assert_eq!(
        scan_range(&session.piece_set, &session.active_pieces, peer, 0, 8),
        Some(3)
    );
    assert_eq!(
        scan_range(&session.piece_set, &session.active_pieces, peer, 4, 8),
        None
    );
}

// ---------------------------------------------------------------------------
// Serving

#[tokio::test]
async fn serves_blocks_only_when_unchoked() {
    let total = 2 * 16384;
    let content: Vec<u8> = (0..total).map(|i| (i * 11 % 241) as u8).collect();
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("payload.bin"), &content).unwrap();

    let metainfo = test_metainfo(16384, total as u64, content_digests(&content, 16384));
    let config = Config {
        file_dir: temp.path().to_path_buf(),
        port: 0,
        use_upnp: false,
    };
    let mut session = Session::new(metainfo, config).await.unwrap();
    assert_eq!(session.info.left, 0);

    let (addr, mut rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;
    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x00])).encode(),
    )
    .await;

    let request = Message::Request {
        index: 0,
        begin: 0,
        length: BLOCK_SIZE,
    };

    // Still choking: the request is ignored.
    deliver(&mut session, addr, request.encode()).await;
    assert!(frames(&mut rx).is_empty());
    assert_eq!(session.info.uploaded, 0);

    session.peers.get_mut(&addr).unwrap().set_choke(false);
    frames(&mut rx); // the unchoke itself

    deliver(&mut session, addr, request.encode()).await;
    let sent = frames(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], 7);
    assert_eq!(&sent[0][9..], &content[..BLOCK_SIZE as usize]);
    assert_eq!(session.info.uploaded, u64::from(BLOCK_SIZE));
    assert!(session.peers[&addr].peer_requests.is_empty());
}

#[tokio::test]
async fn malformed_request_closes_the_peer() {
    let total = 2 * 16384;
    let content: Vec<u8> = (0..total).map(|i| (i % 256) as u8).collect();
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("payload.bin"), &content).unwrap();

    let metainfo = test_metainfo(16384, total as u64, content_digests(&content, 16384));
    let config = Config {
        file_dir: temp.path().to_path_buf(),
        port: 0,
        use_upnp: false,
    };
    let mut session = Session::new(metainfo, config).await.unwrap();

    let (addr, _rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;
    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x00])).encode(),
    )
    .await;

    // A non-standard block length is a protocol violation.
    deliver(
        &mut session,
        addr,
        Message::Request {
            index: 0,
            begin: 0,
            length: 1,
        }
        .encode(),
    )
    .await;
    assert!(!session.peers.contains_key(&addr));
}

#[tokio::test]
async fn oversized_piece_payload_closes_the_peer() {
    let (mut session, _temp) = test_session(256 * 1024, 256 * 1024, bogus_digests(1)).await;
    let (addr, _rx) = add_test_peer(&mut session, 1);
    shake(&mut session, addr).await;
    deliver(
        &mut session,
        addr,
        Message::Bitfield(Bytes::from_static(&[0x80])).encode(),
    )
    .await;

    deliver(
        &mut session,
        addr,
        Message::Piece {
            index: 0,
            begin: 0,
            data: Bytes::from(vec![0u8; 129 * 1024]),
        }
        .encode(),
    )
    .await;
    assert!(!session.peers.contains_key(&addr));
}
