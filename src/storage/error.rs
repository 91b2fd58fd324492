use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("range {offset}+{length} passes the end of the payload")]
    OutOfRange { offset: u64, length: u64 },
}
