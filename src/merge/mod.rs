//! MergeEngine (§4.C): streaming multi-source XMLTV merge with bounded
//! memory, cooperative cancellation, and peak-memory tracking.

pub mod error;
pub mod xmltv;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::stream::{FuturesUnordered, StreamExt};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use serde::Serialize;
use sysinfo::{Pid, System};
use tokio_util::sync::CancellationToken;

pub use error::MergeError;

use crate::feed_cache::{self, FeedCache};
use crate::store::settings::FeedType;

/// Inputs for one merge run (§4.C).
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub sources: Vec<String>,
    pub channels: HashSet<String>,
    pub timeframe: String,
    pub feed_type: FeedType,
    pub output_filename: String,
    pub download_timeout: Duration,
    pub merge_timeout: Duration,
}

/// Result of a completed merge (§4.C).
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub channels_included: usize,
    pub programs_included: usize,
    pub file_size_human: String,
    pub peak_memory_mb: f64,
    pub days_included: u32,
    pub execution_time_seconds: f64,
}

pub struct MergeEngine {
    feed_cache: Arc<FeedCache>,
    tmp_dir: PathBuf,
}

impl MergeEngine {
    pub fn new(feed_cache: Arc<FeedCache>, tmp_dir: PathBuf) -> Self {
        Self { feed_cache, tmp_dir }
    }

    /// Validate request shape before any I/O (§4.C "Plan", §7 ConfigurationError).
    fn validate(req: &MergeRequest) -> Result<(), MergeError> {
        if req.sources.is_empty() {
            return Err(MergeError::configuration("sources must not be empty"));
        }
        if req.channels.is_empty() {
            return Err(MergeError::configuration("channels must not be empty"));
        }
        if !(req.output_filename.ends_with(".xml") || req.output_filename.ends_with(".xml.gz")) {
            return Err(MergeError::configuration(format!(
                "output_filename '{}' must end in .xml or .xml.gz",
                req.output_filename
            )));
        }
        feed_cache::validate_timeframe_feed_type(&req.timeframe, req.feed_type)
            .map_err(|e| MergeError::configuration(e.to_string()))?;
        Ok(())
    }

    /// Derive the sibling channel-list filename for a source (§6): strip the
    /// XMLTV extension and append `_channel_list.txt`.
    fn channel_list_filename(source: &str) -> String {
        let stem = source
            .strip_suffix(".xml.gz")
            .or_else(|| source.strip_suffix(".xml"))
            .unwrap_or(source);
        format!("{stem}_channel_list.txt")
    }

    /// Fetch and parse `<source>`'s sibling channel-list file (§6): one
    /// channel ID per line, blank lines and `#`-comments ignored.
    pub async fn load_channels_from_source(
        &self,
        source: &str,
        timeframe: &str,
        feed_type: FeedType,
        timeout: Duration,
    ) -> Result<Vec<String>, MergeError> {
        feed_cache::validate_timeframe_feed_type(timeframe, feed_type)
            .map_err(|e| MergeError::configuration(e.to_string()))?;

        let filename = Self::channel_list_filename(source);
        let (path, _status) = self.feed_cache.get(&filename, timeframe, feed_type, timeout).await?;

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| MergeError::parse(format!("failed to read channel list {}: {e}", path.display())))?;

        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Run the full merge pipeline (§4.C). Honours cooperative cancellation
    /// via `cancel` in addition to its own `merge_timeout` deadline.
    pub async fn run(&self, req: MergeRequest, cancel: CancellationToken) -> Result<MergeReport, MergeError> {
        Self::validate(&req)?;

        let started = Instant::now();
        let tmp_path = self.tmp_dir.join(&req.output_filename);

        let peak_memory_mb = Arc::new(Mutex::new(0.0f64));
        let sampler_stop = CancellationToken::new();
        let sampler = tokio::spawn(sample_memory(peak_memory_mb.clone(), sampler_stop.clone()));

        let result = self.run_inner(&req, &tmp_path, cancel).await;

        sampler_stop.cancel();
        let _ = sampler.await;
        let peak_memory_mb = *peak_memory_mb.lock().expect("sampler mutex poisoned");

        match result {
            Ok((channels_included, programs_included)) => {
                let size_bytes = tokio::fs::metadata(&tmp_path)
                    .await
                    .map_err(MergeError::Io)?
                    .len();

                Ok(MergeReport {
                    channels_included,
                    programs_included,
                    file_size_human: human_size(size_bytes),
                    peak_memory_mb,
                    days_included: req.timeframe.parse().unwrap_or(0),
                    execution_time_seconds: started.elapsed().as_secs_f64(),
                })
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        req: &MergeRequest,
        tmp_path: &Path,
        cancel: CancellationToken,
    ) -> Result<(usize, usize), MergeError> {
        let fetched = self.fetch_all(req, cancel.clone()).await?;

        let timed_out = Arc::new(AtomicBool::new(false));
        let merge_cancel = cancel.child_token();
        let watchdog = {
            let merge_cancel = merge_cancel.clone();
            let timed_out = timed_out.clone();
            let merge_timeout = req.merge_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(merge_timeout).await;
                timed_out.store(true, Ordering::SeqCst);
                merge_cancel.cancel();
            })
        };

        let channels = req.channels.clone();
        let paths = fetched;
        let tmp_path = tmp_path.to_path_buf();
        let merge_cancel_for_blocking = merge_cancel.clone();

        let blocking = tokio::task::spawn_blocking(move || {
            run_merge_sync(&paths, &channels, &tmp_path, &merge_cancel_for_blocking)
        });

        let outcome = blocking
            .await
            .map_err(|e| MergeError::parse(format!("merge task panicked: {e}")))?;

        watchdog.abort();

        match outcome {
            Err(MergeError::Cancelled) if timed_out.load(Ordering::SeqCst) => {
                Err(MergeError::MergeTimeout(req.merge_timeout))
            }
            other => other,
        }
    }

    /// Fetch phase (§4.C step 2): up to `min(len(sources), 8)` concurrent
    /// fetches, with a group deadline of `download_timeout`.
    async fn fetch_all(&self, req: &MergeRequest, cancel: CancellationToken) -> Result<Vec<PathBuf>, MergeError> {
        let concurrency = req.sources.len().min(8);

        let fetch = async {
            let mut in_flight = FuturesUnordered::new();
            let mut results: Vec<Option<PathBuf>> = vec![None; req.sources.len()];

            for (index, filename) in req.sources.iter().enumerate().take(concurrency) {
                in_flight.push(self.fetch_one(index, filename.clone(), req));
            }
            let mut next_index = concurrency;

            while let Some(outcome) = in_flight.next().await {
                if cancel.is_cancelled() {
                    return Err(MergeError::Cancelled);
                }
                let (index, path) = outcome?;
                results[index] = Some(path);

                if next_index < req.sources.len() {
                    in_flight.push(self.fetch_one(next_index, req.sources[next_index].clone(), req));
                    next_index += 1;
                }
            }

            Ok(results.into_iter().map(|p| p.expect("every source fetched")).collect())
        };

        tokio::time::timeout(req.download_timeout, fetch)
            .await
            .map_err(|_| MergeError::DownloadTimeout(format!("{:?}", req.download_timeout)))?
    }

    async fn fetch_one(&self, index: usize, filename: String, req: &MergeRequest) -> Result<(usize, PathBuf), MergeError> {
        let (path, status) = self
            .feed_cache
            .get(&filename, &req.timeframe, req.feed_type, req.download_timeout)
            .await?;
        tracing::debug!(filename = %filename, ?status, "fetched merge source");
        Ok((index, path))
    }
}

/// The synchronous, blocking half of the merge phase (§4.C steps 3a-3d):
/// two sequential scans over the already-fetched local files, writing
/// directly into a gzip XMLTV writer. Runs off the async executor via
/// `spawn_blocking`.
fn run_merge_sync(
    sources: &[PathBuf],
    channels: &HashSet<String>,
    tmp_path: &Path,
    cancel: &CancellationToken,
) -> Result<(usize, usize), MergeError> {
    if let Some(parent) = tmp_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(tmp_path)?;
    let encoder = GzEncoder::new(std::io::BufWriter::new(file), Compression::default());
    let mut writer = Writer::new(encoder);

    writer
        .write_event(Event::Start(BytesStart::new("tv")))
        .map_err(|e| MergeError::parse(e.to_string()))?;

    let mut emitted_channels = HashSet::new();
    for source in sources {
        let reader = xmltv::open_source(source)?;
        xmltv::emit_channels_from_source(reader, channels, &mut emitted_channels, &mut writer, cancel)?;
    }

    let mut seen = HashSet::new();
    let mut programs_included = 0usize;
    for source in sources {
        let reader = xmltv::open_source(source)?;
        programs_included +=
            xmltv::emit_programmes_from_source(reader, &emitted_channels, &mut seen, &mut writer, cancel)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("tv")))
        .map_err(|e| MergeError::parse(e.to_string()))?;

    let encoder = writer.into_inner();
    let mut buf_writer = encoder.finish()?;
    std::io::Write::flush(&mut buf_writer)?;

    Ok((emitted_channels.len(), programs_included))
}

/// Sample this process's resident memory once per second until `stop` fires
/// (§4.C "Memory sampling"), tracking the running maximum in `peak_mb`.
async fn sample_memory(peak_mb: Arc<Mutex<f64>>, stop: CancellationToken) {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();

    loop {
        system.refresh_process(pid);
        if let Some(process) = system.process(pid) {
            let mb = process.memory() as f64 / (1024.0 * 1024.0);
            let mut peak = peak_mb.lock().expect("sampler mutex poisoned");
            if mb > *peak {
                *peak = mb;
            }
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

/// `0.04MB`-style human-readable size, two decimals, MiB base (§4.C "Post").
fn human_size(bytes: u64) -> String {
    format!("{:.2}MB", bytes as f64 / (1024.0 * 1024.0))
}
