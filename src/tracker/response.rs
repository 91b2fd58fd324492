use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Lifecycle marker sent with an announce. Only the first announce of a run
/// carries `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    None,
    Started,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
        }
    }
}

/// A successful announce.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds until the tracker wants the next announce.
    pub interval: u32,
    /// Seeders in the swarm, when the tracker reports them.
    pub complete: Option<u32>,
    /// Leechers in the swarm, when the tracker reports them.
    pub incomplete: Option<u32>,
    /// Swarm members from the compact peer blob.
    pub peers: Vec<SocketAddr>,
}

/// Parses the compact peer format: 6 bytes per peer, a 4-byte IPv4 address
/// followed by a big-endian port. A trailing partial entry is dropped.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}
