use thiserror::Error;

/// Errors surfaced across the Facade boundary (§4.G, §6 "errors return
/// `{\"detail\": ...}`"), each carrying the HTTP status code its kind maps to.
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("a merge is already in progress")]
    Busy,

    #[error("{0}")]
    Internal(String),
}

impl FacadeError {
    /// The HTTP status code this error maps to (§6: "400 validation, 404
    /// missing, 409 busy, 500 internal").
    pub fn status_code(&self) -> u16 {
        match self {
            FacadeError::Validation(_) => 400,
            FacadeError::NotFound(_) => 404,
            FacadeError::Busy => 409,
            FacadeError::Internal(_) => 500,
        }
    }
}

impl From<crate::merge::MergeError> for FacadeError {
    fn from(err: crate::merge::MergeError) -> Self {
        match err {
            crate::merge::MergeError::Configuration(msg) => FacadeError::Validation(msg),
            other => FacadeError::Internal(other.to_string()),
        }
    }
}

impl From<crate::archive::ArchiveError> for FacadeError {
    fn from(err: crate::archive::ArchiveError) -> Self {
        match err {
            crate::archive::ArchiveError::NotFound(msg) => FacadeError::NotFound(msg),
            crate::archive::ArchiveError::ConflictDeletion(msg) => FacadeError::Validation(msg),
            other => FacadeError::Internal(other.to_string()),
        }
    }
}

impl From<crate::scheduler::SchedulerError> for FacadeError {
    fn from(err: crate::scheduler::SchedulerError) -> Self {
        match err {
            crate::scheduler::SchedulerError::Busy => FacadeError::Busy,
            crate::scheduler::SchedulerError::InvalidSchedule(msg) => FacadeError::Validation(msg),
            crate::scheduler::SchedulerError::Configuration(msg) => FacadeError::Validation(msg),
            other => FacadeError::Internal(other.to_string()),
        }
    }
}

impl From<crate::store::StoreError> for FacadeError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound(msg) => FacadeError::NotFound(msg),
            other => FacadeError::Internal(other.to_string()),
        }
    }
}

impl From<crate::store::settings::SettingsError> for FacadeError {
    fn from(err: crate::store::settings::SettingsError) -> Self {
        FacadeError::Validation(err.to_string())
    }
}

impl From<crate::feed_cache::FeedCacheError> for FacadeError {
    fn from(err: crate::feed_cache::FeedCacheError) -> Self {
        match err {
            crate::feed_cache::FeedCacheError::Configuration(msg) => FacadeError::Validation(msg),
            other => FacadeError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for FacadeError {
    fn from(err: std::io::Error) -> Self {
        FacadeError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for FacadeError {
    fn from(err: serde_json::Error) -> Self {
        FacadeError::Validation(err.to_string())
    }
}
