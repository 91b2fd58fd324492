use thiserror::Error;

/// Errors on a peer connection. All of them end the connection; none of them
/// end the session.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid handshake")]
    InvalidHandshake,

    #[error("info hash mismatch")]
    InfoHashMismatch,

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("unknown message id: {0}")]
    UnknownMessageId(u8),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}
