//! HTTP tracker announces.
//!
//! The tracker is how a client joins the swarm: it announces its state
//! (`info_hash`, listen port, transfer counters) with a GET request and
//! receives a bencoded dictionary carrying the re-announce interval and a
//! compact list of peers, 6 bytes each (IPv4 address plus big-endian port).

mod error;
mod http;
mod response;

pub use error::TrackerError;
pub use http::HttpTracker;
pub use response::{parse_compact_peers, AnnounceResponse, TrackerEvent};
