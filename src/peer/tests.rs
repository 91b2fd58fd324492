use super::*;
use bytes::Bytes;

#[test]
fn peer_id_has_prefix_and_varies() {
    let a = PeerId::generate();
    let b = PeerId::generate();
    assert_eq!(a.0.len(), 20);
    assert!(a.0.starts_with(crate::constants::CLIENT_PREFIX.as_bytes()));
    assert!(a.0.iter().all(|b| b.is_ascii()));
    assert_ne!(a.0, b.0);
}

#[test]
fn bitfield_set_and_test() {
    let mut bf = Bitfield::new(100);
    assert_eq!(bf.len(), 100);
    assert!(!bf.has(0));

    bf.set(0);
    bf.set(99);
    assert!(bf.has(0));
    assert!(bf.has(99));
    assert!(!bf.has(50));
    assert_eq!(bf.count_ones(), 2);

    // Out of range: no-op and false.
    bf.set(100);
    assert!(!bf.has(100));
    assert_eq!(bf.count_ones(), 2);
}

#[test]
fn bitfield_import_export_round_trip() {
    let mut bf = Bitfield::new(11);
    bf.set(0);
    bf.set(7);
    bf.set(10);

    let imported = Bitfield::from_bytes(bf.as_bytes(), 11).unwrap();
    assert_eq!(imported, bf);
}

#[test]
fn bitfield_import_rejects_wrong_length() {
    assert!(Bitfield::from_bytes(&[0x00], 11).is_none());
    assert!(Bitfield::from_bytes(&[0x00, 0x00, 0x00], 11).is_none());
    assert!(Bitfield::from_bytes(&[0x00, 0x00], 11).is_some());
}

#[test]
fn bitfield_import_rejects_set_padding_bits() {
    // 11 pieces leave 5 padding bits at the bottom of the second byte.
    assert!(Bitfield::from_bytes(&[0xFF, 0xE0], 11).is_some());
    assert!(Bitfield::from_bytes(&[0xFF, 0xF0], 11).is_none());
    assert!(Bitfield::from_bytes(&[0x00, 0x01], 11).is_none());
    // A multiple of eight has no padding to reject.
    assert!(Bitfield::from_bytes(&[0xFF, 0xFF], 16).is_some());
}

#[test]
fn handshake_layout() {
    let handshake = Handshake::new([1u8; 20], [2u8; 20]);
    let encoded = handshake.encode();

    assert_eq!(encoded.len(), HANDSHAKE_LEN);
    assert_eq!(encoded[0], 19);
    assert_eq!(&encoded[1..20], b"BitTorrent protocol");
    assert_eq!(&encoded[20..28], &[0u8; 8]);
    assert_eq!(&encoded[28..48], &[1u8; 20]);
    assert_eq!(&encoded[48..68], &[2u8; 20]);
}

#[test]
fn message_round_trips() {
    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { index: 42 },
        Message::Bitfield(Bytes::from_static(&[0xA0])),
        Message::Request {
            index: 3,
            begin: 16384,
            length: 16384,
        },
        Message::Piece {
            index: 3,
            begin: 16384,
            data: Bytes::from_static(b"block data"),
        },
        Message::Cancel {
            index: 3,
            begin: 16384,
            length: 16384,
        },
        Message::Port(6881),
    ];
    for message in messages {
        let decoded = Message::decode(message.encode()).unwrap();
        assert_eq!(decoded, message);
    }
}

#[test]
fn decode_checks_payload_lengths() {
    // Flag messages carry nothing.
    assert!(Message::decode(Bytes::from_static(&[0, 0])).is_err());
    // Have carries exactly four bytes.
    assert!(Message::decode(Bytes::from_static(&[4, 0, 0])).is_err());
    // Request carries exactly twelve.
    assert!(Message::decode(Bytes::from_static(&[6, 0, 0, 0, 0])).is_err());
    // Piece needs at least index and begin.
    assert!(Message::decode(Bytes::from_static(&[7, 0, 0, 0, 0])).is_err());
}

#[test]
fn decode_ignores_port_payload_length() {
    // Peers have been seen padding the port message; it must not error.
    let mut padded = vec![9u8];
    padded.extend_from_slice(&[0x1A, 0xE1]);
    padded.extend_from_slice(&[0u8; 30]);
    assert_eq!(
        Message::decode(Bytes::from(padded)).unwrap(),
        Message::Port(6881)
    );
    assert_eq!(
        Message::decode(Bytes::from_static(&[9])).unwrap(),
        Message::Port(0)
    );
}

#[test]
fn decode_rejects_unknown_opcodes() {
    assert!(matches!(
        Message::decode(Bytes::from_static(&[20, 0])),
        Err(PeerError::UnknownMessageId(20))
    ));
}

#[test]
fn empty_payload_is_keep_alive() {
    assert_eq!(
        Message::decode(Bytes::new()).unwrap(),
        Message::KeepAlive
    );
    assert!(Message::KeepAlive.encode().is_empty());
}
