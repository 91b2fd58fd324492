use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;
use crate::constants::PROTOCOL_STRING;

/// Length of the handshake on the wire.
pub const HANDSHAKE_LEN: usize = 68;

/// The 68-byte BitTorrent handshake, sent in both directions immediately
/// after connect or accept.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Encodes the full handshake. All eight reserved bytes stay zero; no
    /// extensions are advertised.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_STRING.len() as u8);
        buf.put_slice(PROTOCOL_STRING);
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }
}

/// A peer wire message in payload form.
///
/// The 4-byte length prefix belongs to the framing layer: the reader strips
/// it before [`Message::decode`] and the writer puts it back around the
/// output of [`Message::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// The empty frame; resets the peer's idle clock and nothing else.
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// Announces one newly acquired piece.
    Have { index: u32 },
    /// Announces every piece the sender holds; only valid as the first
    /// message after the handshake.
    Bitfield(Bytes),
    /// Asks for a block of a piece.
    Request { index: u32, begin: u32, length: u32 },
    /// Carries block data.
    Piece { index: u32, begin: u32, data: Bytes },
    /// Withdraws an earlier request.
    Cancel { index: u32, begin: u32, length: u32 },
    /// DHT listen port; accepted and ignored.
    Port(u16),
}

impl Message {
    /// Encodes the message payload, without the length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Message::KeepAlive => {}
            Message::Choke => buf.put_u8(0),
            Message::Unchoke => buf.put_u8(1),
            Message::Interested => buf.put_u8(2),
            Message::NotInterested => buf.put_u8(3),
            Message::Have { index } => {
                buf.put_u8(4);
                buf.put_u32(*index);
            }
            Message::Bitfield(bits) => {
                buf.put_u8(5);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u8(6);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u8(7);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u8(8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Port(port) => {
                buf.put_u8(9);
                buf.put_u16(*port);
            }
        }
        buf.freeze()
    }

    /// Decodes a message payload. The empty payload is a keep-alive.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let id = data.get_u8();
        match id {
            0 | 1 | 2 | 3 => {
                if !data.is_empty() {
                    return Err(PeerError::InvalidMessage("unexpected payload"));
                }
                Ok(match id {
                    0 => Message::Choke,
                    1 => Message::Unchoke,
                    2 => Message::Interested,
                    _ => Message::NotInterested,
                })
            }
            4 => {
                if data.remaining() != 4 {
                    return Err(PeerError::InvalidMessage("have length"));
                }
                Ok(Message::Have {
                    index: data.get_u32(),
                })
            }
            5 => Ok(Message::Bitfield(data)),
            6 | 8 => {
                if data.remaining() != 12 {
                    return Err(PeerError::InvalidMessage("request length"));
                }
                let (index, begin, length) = (data.get_u32(), data.get_u32(), data.get_u32());
                Ok(if id == 6 {
                    Message::Request {
                        index,
                        begin,
                        length,
                    }
                } else {
                    Message::Cancel {
                        index,
                        begin,
                        length,
                    }
                })
            }
            7 => {
                if data.remaining() < 8 {
                    return Err(PeerError::InvalidMessage("piece length"));
                }
                let index = data.get_u32();
                let begin = data.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    data,
                })
            }
            9 => {
                // Some clients pad this message; the length is deliberately
                // not asserted.
                let port = if data.remaining() >= 2 { data.get_u16() } else { 0 };
                Ok(Message::Port(port))
            }
            other => Err(PeerError::UnknownMessageId(other)),
        }
    }
}
