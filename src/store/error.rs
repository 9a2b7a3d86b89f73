use thiserror::Error;

/// Errors raised by the Store (§4.A, §7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    ConflictDeletion(String),
}
