use thiserror::Error;

/// Fatal errors: anything that stops the session from being built. Once the
/// loop runs, peer-level trouble never surfaces here.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("tracker error: {0}")]
    Tracker(#[from] crate::tracker::TrackerError),

    #[error("port mapping error: {0}")]
    Upnp(#[from] crate::upnp::UpnpError),
}
