use std::path::PathBuf;

use crate::peer::PeerId;

/// Runtime configuration, handed to the session explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the payload files live under.
    pub file_dir: PathBuf,
    /// Listen port; 0 asks the OS for one.
    pub port: u16,
    /// Map the listen port on the gateway via UPnP.
    pub use_upnp: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file_dir: PathBuf::from("."),
            port: 0,
            use_upnp: false,
        }
    }
}

/// Identity and transfer counters for one run.
#[derive(Debug)]
pub struct SessionInfo {
    pub peer_id: PeerId,
    pub port: u16,
    /// Bytes served to the swarm.
    pub uploaded: u64,
    /// Bytes received from the swarm.
    pub downloaded: u64,
    /// Bytes still missing from the payload.
    pub left: u64,
}
