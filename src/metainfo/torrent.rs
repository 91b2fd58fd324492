use std::fmt;
use std::path::PathBuf;

use sha1::{Digest, Sha1};

use super::error::MetainfoError;
use crate::bencode::{decode, encode, Value};
use crate::constants::{HTTP_TIMEOUT, USER_AGENT};

/// The SHA-1 of the bencoded info dictionary, identifying a torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self)
    }
}

/// A parsed torrent descriptor.
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub info: Info,
    pub info_hash: InfoHash,
    /// Primary announce URL.
    pub announce: String,
    pub comment: Option<String>,
}

/// The info dictionary: content name, piece geometry and file layout.
#[derive(Debug, Clone)]
pub struct Info {
    /// Name of the file, or of the root directory for multi-file torrents.
    pub name: String,
    /// Bytes per piece; the final piece may be shorter.
    pub piece_length: u64,
    /// One SHA-1 digest per piece.
    pub pieces: Vec<[u8; 20]>,
    /// Payload files in layout order.
    pub files: Vec<FileInfo>,
    /// Sum of all file lengths.
    pub total_length: u64,
}

/// A file within the torrent payload.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Path relative to the storage root.
    pub path: PathBuf,
    pub length: u64,
}

impl Metainfo {
    /// Loads a descriptor from a local path or, when the argument is an
    /// `http(s)` URL, over HTTP.
    pub async fn load(source: &str) -> Result<Self, MetainfoError> {
        let data = if source.starts_with("http://") || source.starts_with("https://") {
            let client = reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()?;
            client.get(source).send().await?.bytes().await?.to_vec()
        } else {
            tokio::fs::read(source).await?
        };
        Self::from_bytes(&data)
    }

    /// Parses a descriptor from raw bencoded bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let root = decode(data)?;
        if root.as_dict().is_none() {
            return Err(MetainfoError::InvalidField("root"));
        }

        let info_value = root
            .get(b"info")
            .ok_or(MetainfoError::MissingField("info"))?;
        // The info hash covers the info dictionary exactly as bencoded.
        let digest: [u8; 20] = Sha1::digest(encode(info_value)).into();
        let info_hash = InfoHash(digest);
        let info = parse_info(info_value)?;

        let announce = root
            .get(b"announce")
            .and_then(|v| v.as_str())
            .ok_or(MetainfoError::MissingField("announce"))?
            .to_string();

        let comment = root
            .get(b"comment")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Self {
            info,
            info_hash,
            announce,
            comment,
        })
    }
}

fn parse_info(value: &Value) -> Result<Info, MetainfoError> {
    if value.as_dict().is_none() {
        return Err(MetainfoError::InvalidField("info"));
    }

    let name = value
        .get(b"name")
        .and_then(|v| v.as_str())
        .ok_or(MetainfoError::MissingField("name"))?
        .to_string();

    let piece_length = value
        .get(b"piece length")
        .and_then(|v| v.as_integer())
        .filter(|&n| n > 0)
        .ok_or(MetainfoError::MissingField("piece length"))? as u64;

    let pieces_bytes = value
        .get(b"pieces")
        .and_then(|v| v.as_bytes())
        .ok_or(MetainfoError::MissingField("pieces"))?;
    if pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }
    let pieces: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut digest = [0u8; 20];
            digest.copy_from_slice(chunk);
            digest
        })
        .collect();

    let (files, total_length) = parse_layout(value, &name)?;

    Ok(Info {
        name,
        piece_length,
        pieces,
        files,
        total_length,
    })
}

/// Extracts the file layout: a bare `length` means a single file named after
/// the torrent; a `files` list nests each path under the torrent name.
fn parse_layout(value: &Value, name: &str) -> Result<(Vec<FileInfo>, u64), MetainfoError> {
    if let Some(length) = value.get(b"length").and_then(|v| v.as_integer()) {
        let length = length as u64;
        let file = FileInfo {
            path: PathBuf::from(name),
            length,
        };
        return Ok((vec![file], length));
    }

    let entries = value
        .get(b"files")
        .and_then(|v| v.as_list())
        .ok_or(MetainfoError::MissingField("length or files"))?;

    let mut files = Vec::with_capacity(entries.len());
    let mut total = 0u64;
    for entry in entries {
        let length = entry
            .get(b"length")
            .and_then(|v| v.as_integer())
            .ok_or(MetainfoError::MissingField("file length"))? as u64;

        let components = entry
            .get(b"path")
            .and_then(|v| v.as_list())
            .ok_or(MetainfoError::MissingField("file path"))?;
        let path: PathBuf = std::iter::once(name.to_string())
            .chain(
                components
                    .iter()
                    .filter_map(|c| c.as_str().map(String::from)),
            )
            .collect();

        files.push(FileInfo { path, length });
        total += length;
    }

    Ok((files, total))
}
