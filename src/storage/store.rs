use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use super::error::StorageError;
use crate::metainfo::FileInfo;

struct StoreFile {
    handle: Mutex<File>,
    /// Where this file starts within the virtual byte range.
    offset: u64,
    length: u64,
}

/// Random-access facade over the torrent's file layout.
///
/// Routes reads and writes across file boundaries over the virtual range
/// `[0, total)`. Missing files are created (with their parent directories)
/// and short ones extended to their declared length at construction. The
/// store is owned exclusively for the life of the session; concurrent
/// operations on disjoint ranges are safe.
pub struct FileStore {
    files: Vec<StoreFile>,
    total: u64,
}

impl FileStore {
    /// Opens every file of `layout` under `root`.
    pub async fn open(root: &Path, layout: &[FileInfo]) -> Result<Self, StorageError> {
        let mut files = Vec::with_capacity(layout.len());
        let mut offset = 0u64;
        for info in layout {
            let path = root.join(&info.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .await?;
            if file.metadata().await?.len() < info.length {
                file.set_len(info.length).await?;
            }
            files.push(StoreFile {
                handle: Mutex::new(file),
                offset,
                length: info.length,
            });
            offset += info.length;
        }
        debug!(files = files.len(), total = offset, "file store opened");
        Ok(Self {
            files,
            total: offset,
        })
    }

    /// Total payload size in bytes.
    pub fn total_length(&self) -> u64 {
        self.total
    }

    /// Reads `length` bytes starting at virtual offset `offset`.
    pub async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, StorageError> {
        self.check_range(offset, length as u64)?;
        let mut data = vec![0u8; length];
        let mut filled = 0usize;
        for file in self.spanning(offset, length as u64) {
            let start = offset + filled as u64 - file.offset;
            let take = ((file.length - start) as usize).min(length - filled);
            let mut handle = file.handle.lock().await;
            handle.seek(SeekFrom::Start(start)).await?;
            handle.read_exact(&mut data[filled..filled + take]).await?;
            filled += take;
        }
        Ok(Bytes::from(data))
    }

    /// Writes `data` starting at virtual offset `offset`.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        self.check_range(offset, data.len() as u64)?;
        let mut written = 0usize;
        for file in self.spanning(offset, data.len() as u64) {
            let start = offset + written as u64 - file.offset;
            let take = ((file.length - start) as usize).min(data.len() - written);
            let mut handle = file.handle.lock().await;
            handle.seek(SeekFrom::Start(start)).await?;
            handle.write_all(&data[written..written + take]).await?;
            written += take;
        }
        Ok(())
    }

    fn check_range(&self, offset: u64, length: u64) -> Result<(), StorageError> {
        match offset.checked_add(length) {
            Some(end) if end <= self.total => Ok(()),
            _ => Err(StorageError::OutOfRange { offset, length }),
        }
    }

    /// Files overlapping `[offset, offset + length)`, in layout order.
    fn spanning(&self, offset: u64, length: u64) -> impl Iterator<Item = &StoreFile> {
        let end = offset + length;
        self.files
            .iter()
            .filter(move |file| file.offset < end && file.offset + file.length > offset)
    }
}
