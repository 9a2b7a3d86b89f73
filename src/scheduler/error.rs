use thiserror::Error;

/// Errors raised by the Scheduler (§4.E, §7).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("a merge is already in progress")]
    Busy,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Merge(#[from] crate::merge::MergeError),

    #[error(transparent)]
    Archive(#[from] crate::archive::ArchiveError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Settings(#[from] crate::store::settings::SettingsError),
}
