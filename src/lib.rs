//! riptide - a BitTorrent v1 client
//!
//! Given a torrent descriptor, riptide downloads the referenced content from
//! a swarm of peers and serves already-acquired pieces back to them over the
//! standard peer wire protocol.
//!
//! # Modules
//!
//! - [`bencode`] - the serialisation used by torrent files and trackers
//! - [`metainfo`] - `.torrent` descriptor parsing
//! - [`peer`] - peer wire protocol: message codec, per-connection state and I/O tasks
//! - [`session`] - the swarm engine: event loop, block scheduler, piece verification
//! - [`storage`] - random-access view over the multi-file payload
//! - [`tracker`] - HTTP tracker announces
//! - [`upnp`] - gateway port mapping for inbound connections

pub mod bencode;
pub mod constants;
pub mod metainfo;
pub mod peer;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod upnp;

pub use bencode::{decode, encode, BencodeError, Value};
pub use metainfo::{FileInfo, Info, InfoHash, Metainfo, MetainfoError};
pub use peer::{Bitfield, Handshake, Message, PeerError, PeerId};
pub use session::{Config, Session, SessionError, SessionInfo};
pub use storage::{FileStore, StorageError};
pub use tracker::{AnnounceResponse, HttpTracker, TrackerError, TrackerEvent};
