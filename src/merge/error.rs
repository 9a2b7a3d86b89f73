use thiserror::Error;

/// Errors raised by the MergeEngine (§4.C, §7).
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("download timed out: {0}")]
    DownloadTimeout(String),

    #[error("failed to parse source: {0}")]
    ParseError(String),

    #[error("merge timed out after {0:?}")]
    MergeTimeout(std::time::Duration),

    #[error("merge cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MergeError {
    pub fn parse(detail: impl Into<String>) -> Self {
        Self::ParseError(detail.into())
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration(detail.into())
    }
}

impl From<crate::feed_cache::FeedCacheError> for MergeError {
    fn from(err: crate::feed_cache::FeedCacheError) -> Self {
        use crate::feed_cache::FeedCacheError as E;
        match err {
            E::UpstreamUnavailable(detail) => MergeError::UpstreamUnavailable(detail),
            E::UpstreamMalformed(detail) => MergeError::UpstreamUnavailable(detail),
            E::Configuration(detail) => MergeError::Configuration(detail),
            E::Io(e) => MergeError::Io(e),
        }
    }
}
