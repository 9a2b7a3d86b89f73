use thiserror::Error;

/// Errors raised by the FeedCache (§4.B, §7).
#[derive(Debug, Error)]
pub enum FeedCacheError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream response malformed: {0}")]
    UpstreamMalformed(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
