use reqwest::Client;
use tracing::debug;

use super::error::TrackerError;
use super::response::{parse_compact_peers, AnnounceResponse, TrackerEvent};
use crate::bencode::decode;
use crate::constants::{HTTP_TIMEOUT, USER_AGENT};

/// Client for the torrent's primary announce URL.
pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Announces our state and returns the tracker's view of the swarm.
    #[allow(clippy::too_many_arguments)]
    pub async fn announce(
        &self,
        info_hash: &[u8; 20],
        peer_id: &[u8; 20],
        port: u16,
        uploaded: u64,
        downloaded: u64,
        left: u64,
        event: TrackerEvent,
    ) -> Result<AnnounceResponse, TrackerError> {
        let mut url = format!(
            "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            self.url,
            url_encode(info_hash),
            url_encode(peer_id),
            port,
            uploaded,
            downloaded,
            left,
        );
        if !event.as_str().is_empty() {
            url.push_str("&event=");
            url.push_str(event.as_str());
        }
        debug!(%url, "tracker announce");

        let body = self.client.get(&url).send().await?.bytes().await?;
        parse_announce(&body)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Parses a bencoded announce response body.
pub(super) fn parse_announce(body: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let value = decode(body)?;
    if value.as_dict().is_none() {
        return Err(TrackerError::InvalidResponse("expected a dictionary"));
    }
    if let Some(reason) = value.get(b"failure reason").and_then(|v| v.as_str()) {
        return Err(TrackerError::Failure(reason.to_string()));
    }

    let interval = value
        .get(b"interval")
        .and_then(|v| v.as_integer())
        .ok_or(TrackerError::InvalidResponse("missing interval"))? as u32;
    let complete = value
        .get(b"complete")
        .and_then(|v| v.as_integer())
        .map(|n| n as u32);
    let incomplete = value
        .get(b"incomplete")
        .and_then(|v| v.as_integer())
        .map(|n| n as u32);
    let peers = value
        .get(b"peers")
        .and_then(|v| v.as_bytes())
        .map(parse_compact_peers)
        .unwrap_or_default();

    Ok(AnnounceResponse {
        interval,
        complete,
        incomplete,
        peers,
    })
}

/// Percent-escapes raw bytes for a query parameter.
pub(super) fn url_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect()
}
