use sha1::{Digest, Sha1};
use tracing::info;

use crate::metainfo::Info;
use crate::peer::Bitfield;
use crate::storage::{FileStore, StorageError};

/// Outcome of the startup piece scan.
pub struct VerifySummary {
    pub good: u32,
    pub bad: u32,
    /// Bit `i` set iff piece `i` hashed correctly.
    pub have: Bitfield,
}

/// Reads every piece, hashes it and compares against the metainfo digests.
///
/// This is the only integrity check the client performs: pieces completed
/// later in the run are trusted as received.
pub async fn check_pieces(store: &FileStore, info: &Info) -> Result<VerifySummary, StorageError> {
    let total = store.total_length();
    let piece_length = info.piece_length;
    let mut have = Bitfield::new(info.pieces.len());
    let (mut good, mut bad) = (0u32, 0u32);

    for (index, expected) in info.pieces.iter().enumerate() {
        let offset = index as u64 * piece_length;
        let length = piece_length.min(total.saturating_sub(offset)) as usize;
        let data = store.read_at(offset, length).await?;
        let digest: [u8; 20] = Sha1::digest(&data).into();
        if digest == *expected {
            good += 1;
            have.set(index);
        } else {
            bad += 1;
        }
    }

    info!(good, bad, "piece scan finished");
    Ok(VerifySummary { good, bad, have })
}
