use thiserror::Error;

/// Errors raised by the ArchiveManager (§4.D, §7).
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    ConflictDeletion(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}
