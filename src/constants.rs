//! Protocol constants and tuning parameters.

use std::time::Duration;

/// Client id prefix for peer id generation (Azureus-style).
pub const CLIENT_PREFIX: &str = "-RT0001-";

/// User agent for tracker and metainfo HTTP requests.
pub const USER_AGENT: &str = "riptide/0.1.0";

/// BitTorrent protocol identifier sent in every handshake.
pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Standard block size (16 KiB). Pieces are requested in blocks of this size.
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Largest `piece` payload we accept.
pub const MAX_BLOCK_SIZE: u32 = 128 * 1024;

/// Largest length-prefixed frame we accept; anything bigger kills the
/// connection at the reader.
pub const MAX_FRAME_SIZE: u32 = 130 * 1024;

/// Block requests we keep outstanding per peer.
pub const MAX_OUR_REQUESTS: usize = 2;

/// Block requests a peer may keep outstanding with us.
pub const MAX_PEER_REQUESTS: usize = 10;

/// How long a block request may stay outstanding before its block returns to
/// the pool.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Rechoke tick.
pub const RECHOKE_INTERVAL: Duration = Duration::from_secs(10);

/// Keep-alive sweep tick.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Send a keep-alive when nothing was written to a peer for this long.
pub const KEEPALIVE_AFTER: Duration = Duration::from_secs(120);

/// Drop peers that sent nothing for this long.
pub const PEER_IDLE_TIMEOUT: Duration = Duration::from_secs(180);

/// Tracker poll cadence until the first response arrives.
pub const TRACKER_INITIAL_INTERVAL: Duration = Duration::from_secs(20);

/// Clamp bounds for the tracker-supplied announce interval, in seconds.
pub const TRACKER_MIN_INTERVAL: u64 = 120;
pub const TRACKER_MAX_INTERVAL: u64 = 24 * 3600;

/// Timeout for tracker announces and metainfo fetches.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// SSDP multicast address and port for UPnP gateway discovery.
pub const SSDP_MULTICAST: &str = "239.255.255.250";
pub const SSDP_PORT: u16 = 1900;

/// Timeouts for UPnP discovery and SOAP calls.
pub const UPNP_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const UPNP_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
