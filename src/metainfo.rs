//! Torrent metainfo handling.
//!
//! Parses v1 `.torrent` descriptors: the announce URL, the info hash, the
//! piece digests and the single- or multi-file layout.

mod error;
mod torrent;

pub use error::MetainfoError;
pub use torrent::{FileInfo, Info, InfoHash, Metainfo};
