//! FeedCache (§4.B): cache-aware fetcher for upstream XMLTV feeds.
//!
//! Produces a local path to the latest bytes of a named upstream feed,
//! minimising wire I/O via HEAD-based change detection and a 24h TTL.

pub mod error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

pub use error::FeedCacheError;

use crate::store::settings::FeedType;

pub const UPSTREAM: &str = "https://share.jesmann.com/";
pub const TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of a single `FeedCache::get` call (§4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Hit,
    StaleRefetch,
    Miss,
    Changed,
    Unchanged,
}

/// `FOLDER_MAP[timeframe][feed_type]` (§3 I5): total for timeframe ∈ {3,7},
/// only `iptv` defined for timeframe 14.
pub(crate) fn folder_for(timeframe: &str, feed_type: FeedType) -> Option<&'static str> {
    match (timeframe, feed_type) {
        ("3", FeedType::Iptv) => Some("3day/iptv"),
        ("3", FeedType::Gracenote) => Some("3day/gracenote"),
        ("7", FeedType::Iptv) => Some("7day/iptv"),
        ("7", FeedType::Gracenote) => Some("7day/gracenote"),
        ("14", FeedType::Iptv) => Some("14day/iptv"),
        _ => None,
    }
}

/// Validate a (timeframe, feed_type) pair against FOLDER_MAP without
/// touching the network (§4.C step 1 "Plan" validates before any I/O).
pub fn validate_timeframe_feed_type(timeframe: &str, feed_type: FeedType) -> Result<(), FeedCacheError> {
    folder_for(timeframe, feed_type).map(|_| ()).ok_or_else(|| {
        FeedCacheError::Configuration(format!(
            "no folder mapping for timeframe '{timeframe}' feed_type '{}'",
            feed_type.as_str()
        ))
    })
}

pub struct FeedCache {
    client: reqwest::Client,
    cache_dir: PathBuf,
    base_url: String,
    /// Per-filename locks so two concurrent fetches for the same name
    /// serialise onto a single network fetch (§4.B "Concurrency").
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FeedCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self::with_base_url(cache_dir, UPSTREAM.to_string())
    }

    /// Same as `new`, but against an arbitrary origin instead of the fixed
    /// `UPSTREAM` (§4.B tests drive this against a local `wiremock` server).
    pub fn with_base_url(cache_dir: PathBuf, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_dir,
            base_url,
            locks: AsyncMutex::new(HashMap::new()),
        }
    }

    fn local_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(filename)
    }

    fn feed_url(&self, filename: &str, timeframe: &str, feed_type: FeedType) -> Result<String, FeedCacheError> {
        let folder = folder_for(timeframe, feed_type).ok_or_else(|| {
            FeedCacheError::Configuration(format!(
                "no folder mapping for timeframe '{timeframe}' feed_type '{}'",
                feed_type.as_str()
            ))
        })?;
        Ok(format!("{}{folder}/{filename}", self.base_url))
    }

    async fn lock_for(&self, filename: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(filename.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Fetch (or reuse) the latest local bytes for `filename` (§4.B algorithm).
    pub async fn get(
        &self,
        filename: &str,
        timeframe: &str,
        feed_type: FeedType,
        timeout: Duration,
    ) -> Result<(PathBuf, FetchStatus), FeedCacheError> {
        let url = self.feed_url(filename, timeframe, feed_type)?;
        let local_path = self.local_path(filename);

        let per_file_lock = self.lock_for(filename).await;
        let _guard = per_file_lock.lock().await;

        let metadata = tokio::fs::metadata(&local_path).await.ok();

        let status = match metadata {
            None => {
                self.download(&url, &local_path, timeout).await?;
                FetchStatus::Miss
            }
            Some(meta) => {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| m.elapsed().ok())
                    .unwrap_or(TTL);

                if age < TTL {
                    match self.head_content_length(&url, timeout).await? {
                        Some(remote_len) if remote_len == meta.len() => FetchStatus::Hit,
                        _ => {
                            self.download(&url, &local_path, timeout).await?;
                            FetchStatus::Changed
                        }
                    }
                } else {
                    self.download(&url, &local_path, timeout).await?;
                    FetchStatus::StaleRefetch
                }
            }
        };

        Ok((local_path, status))
    }

    /// HEAD request for change detection. A missing `Content-Length` forces
    /// the caller to fall back to GET (§4.B UpstreamMalformed: "downgrade
    /// silently to GET").
    async fn head_content_length(&self, url: &str, timeout: Duration) -> Result<Option<u64>, FeedCacheError> {
        let resp = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FeedCacheError::UpstreamUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FeedCacheError::UpstreamUnavailable(format!(
                "HEAD {url} returned {}",
                resp.status()
            )));
        }

        Ok(resp.content_length())
    }

    async fn download(&self, url: &str, local_path: &Path, timeout: Duration) -> Result<(), FeedCacheError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FeedCacheError::UpstreamUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FeedCacheError::UpstreamUnavailable(format!(
                "GET {url} returned {}",
                resp.status()
            )));
        }

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = local_path.with_extension(format!(
            "{}.part",
            local_path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
        ));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let mut stream = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk: bytes::Bytes = chunk.map_err(|e| FeedCacheError::UpstreamUnavailable(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, local_path).await?;
        Ok(())
    }
}
