//! ContractFacade (§4.G): the narrow set of operations the HTTP layer may
//! invoke on the core. Owns no state of its own beyond references to the
//! components it coordinates.

pub mod error;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::FacadeError;

use crate::archive::{ArchiveManager, ClearTempReport};
use crate::config::Paths;
use crate::feed_cache::FeedCache;
use crate::merge::{MergeEngine, MergeReport, MergeRequest};
use crate::scheduler::Scheduler;
use crate::store::settings::FeedType;
use crate::store::{ArchiveRow, ChannelVersionRow, JobRow, Store};

/// A single entry in an `index.json` source listing (§6 "Channel-list files"
/// establishes the sibling-file convention this extends to source
/// discovery).
const SOURCE_INDEX_FILE: &str = "index.json";

/// Snapshot returned by `job_status` (§4.G, §8 S4).
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusSnapshot {
    pub is_busy: bool,
    pub next_scheduled_run: Option<DateTime<Utc>>,
    pub latest_job: Option<JobRow>,
}

/// On-disk shape of a channel-version file in `channels_dir` (§6 "Channel-version JSON").
#[derive(Debug, Serialize, Deserialize)]
struct ChannelVersionFile {
    channels: Vec<String>,
    sources_count: i32,
    created_at: String,
}

pub struct ContractFacade {
    store: Arc<Store>,
    feed_cache: Arc<FeedCache>,
    merge_engine: Arc<MergeEngine>,
    archive_manager: Arc<ArchiveManager>,
    scheduler: Arc<Scheduler>,
    paths: Paths,
}

impl ContractFacade {
    pub fn new(
        store: Arc<Store>,
        feed_cache: Arc<FeedCache>,
        merge_engine: Arc<MergeEngine>,
        archive_manager: Arc<ArchiveManager>,
        scheduler: Arc<Scheduler>,
        paths: Paths,
    ) -> Self {
        Self { store, feed_cache, merge_engine, archive_manager, scheduler, paths }
    }

    // ---- Sources & channels ------------------------------------------------

    /// Fetch the upstream source catalogue for `(timeframe, feed_type)` (§4.G).
    pub async fn list_sources(&self, timeframe: &str, feed_type: FeedType) -> Result<Vec<String>, FacadeError> {
        crate::feed_cache::validate_timeframe_feed_type(timeframe, feed_type)
            .map_err(|e| FacadeError::Validation(e.to_string()))?;

        let (path, _status) = self
            .feed_cache
            .get(SOURCE_INDEX_FILE, timeframe, feed_type, Duration::from_secs(30))
            .await?;
        let contents = tokio::fs::read_to_string(&path).await?;
        let sources: Vec<String> = serde_json::from_str(&contents)?;
        Ok(sources)
    }

    pub fn save_selected_sources(&self, sources: &[String]) -> Result<(), FacadeError> {
        self.store.set_setting(
            crate::store::settings::SELECTED_SOURCES,
            &crate::store::settings::encode_list(sources),
        )?;
        self.scheduler.notify_settings_changed();
        Ok(())
    }

    pub fn get_settings(&self) -> Result<HashMap<String, String>, FacadeError> {
        Ok(self.store.load_settings()?.raw)
    }

    pub fn set_settings(&self, values: &HashMap<String, String>) -> Result<(), FacadeError> {
        if let Some(webhook) = values.get(crate::store::settings::DISCORD_WEBHOOK) {
            if !webhook.trim().is_empty() {
                url::Url::parse(webhook.trim())
                    .map_err(|e| FacadeError::Validation(format!("discord_webhook is not a valid URL: {e}")))?;
            }
        }
        self.store.set_settings(values)?;
        self.scheduler.notify_settings_changed();
        Ok(())
    }

    /// Union of channel IDs advertised by each source's sibling channel-list
    /// file (§4.G, §6).
    pub async fn load_channels_from_sources(&self, sources: &[String]) -> Result<Vec<String>, FacadeError> {
        let settings = self.store.load_settings()?;
        let timeframe = settings.merge_timeframe(&self.paths);
        let feed_type = settings.selected_feed_type(&self.paths)?;
        let timeout = Duration::from_secs(settings.download_timeout_secs(&self.paths));

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for source in sources {
            let channels = self.merge_engine.load_channels_from_source(source, &timeframe, feed_type, timeout).await?;
            for channel in channels {
                if seen.insert(channel.clone()) {
                    merged.push(channel);
                }
            }
        }
        Ok(merged)
    }

    /// Persist the selected-channel set and archive the previous channel
    /// version, mirroring `ArchiveManager::promote`'s temp-then-archive
    /// shape for `channels_dir` instead of `current_dir` (§4.A lifecycle,
    /// §6 "Channel-version JSON").
    pub async fn save_channels_with_versioning(
        &self,
        channels: HashSet<String>,
        sources_count: i32,
        filename: &str,
    ) -> Result<ChannelVersionRow, FacadeError> {
        let channels_dir = self.paths.channels_dir.clone();
        tokio::fs::create_dir_all(&channels_dir).await?;
        let current_path = channels_dir.join(filename);
        let created_at = Utc::now();

        if tokio::fs::metadata(&current_path).await.is_ok() {
            let timestamp = created_at.format("%Y%m%d_%H%M%S").to_string();
            let archived_name = format!("{filename}.{timestamp}");
            let archived_path = channels_dir.join(&archived_name);

            let previous_row = self.store.list_channel_versions()?.into_iter().find(|r| r.filename == filename);
            tokio::fs::rename(&current_path, &archived_path).await?;

            let row = match previous_row {
                Some(previous) => ChannelVersionRow { filename: archived_name, ..previous },
                None => {
                    let size_bytes = tokio::fs::metadata(&archived_path).await?.len() as i64;
                    ChannelVersionRow {
                        filename: archived_name,
                        created_at: created_at.to_rfc3339(),
                        sources_count: 0,
                        channels_count: 0,
                        size_bytes,
                    }
                }
            };
            self.store.upsert_channel_version(&row)?;
        }

        let mut sorted: Vec<String> = channels.iter().cloned().collect();
        sorted.sort();
        let contents = serde_json::to_string(&ChannelVersionFile {
            channels: sorted,
            sources_count,
            created_at: created_at.to_rfc3339(),
        })?;
        tokio::fs::write(&current_path, &contents).await?;

        let row = ChannelVersionRow {
            filename: filename.to_string(),
            created_at: created_at.to_rfc3339(),
            sources_count,
            channels_count: channels.len() as i32,
            size_bytes: contents.len() as i64,
        };
        self.store.upsert_channel_version(&row)?;
        self.store.replace_selected_channels(&channels)?;

        Ok(row)
    }

    // ---- Merge ---------------------------------------------------------------

    /// Run a one-off merge to `tmp_dir` without recording a Job row (§4.G:
    /// "UI manual merge entry point"). Honours I1 against the Scheduler.
    #[allow(clippy::too_many_arguments)]
    pub async fn merge_execute(
        &self,
        sources: Vec<String>,
        channels: HashSet<String>,
        timeframe: String,
        feed_type: FeedType,
        output_filename: String,
    ) -> Result<MergeReport, FacadeError> {
        let _guard = self.scheduler.try_acquire_merge_lock()?;

        let settings = self.store.load_settings()?;
        let request = MergeRequest {
            sources,
            channels,
            timeframe,
            feed_type,
            output_filename,
            download_timeout: Duration::from_secs(settings.download_timeout_secs(&self.paths)),
            merge_timeout: Duration::from_secs(settings.merge_timeout_secs(&self.paths)),
        };

        let report = self.merge_engine.run(request, tokio_util::sync::CancellationToken::new()).await?;
        Ok(report)
    }

    /// Promote the most recent `merge_execute` output into `current_dir`
    /// (§4.G `merge_save`, §4.D `promote`).
    pub async fn merge_save(&self, channels: i32, programs: i32, days_included: i32) -> Result<ArchiveRow, FacadeError> {
        let output_filename = self.store.load_settings()?.output_filename(&self.paths);
        Ok(self.archive_manager.promote(&output_filename, channels, programs, days_included).await?)
    }

    pub async fn merge_clear_temp(&self) -> Result<ClearTempReport, FacadeError> {
        Ok(self.archive_manager.clear_temp().await?)
    }

    /// Resolve the on-disk path of a not-yet-promoted merge output in
    /// `tmp_dir` (§4.G `merge_download`).
    pub async fn merge_download(&self, filename: &str) -> Result<PathBuf, FacadeError> {
        let path = self.paths.tmp_dir.join(filename);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(FacadeError::NotFound(format!("merge output '{filename}' does not exist")));
        }
        Ok(path)
    }

    // ---- Archives --------------------------------------------------------------

    pub fn archives_list(&self) -> Result<Vec<ArchiveRow>, FacadeError> {
        Ok(self.store.list_archives()?)
    }

    pub async fn archives_download(&self, filename: &str) -> Result<PathBuf, FacadeError> {
        let output_filename = self.store.load_settings()?.output_filename(&self.paths);
        let path = self.archive_manager.path_for(&output_filename, filename);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(FacadeError::NotFound(format!("archive '{filename}' does not exist")));
        }
        Ok(path)
    }

    pub async fn archive_delete(&self, filename: &str) -> Result<(), FacadeError> {
        let output_filename = self.store.load_settings()?.output_filename(&self.paths);
        Ok(self.archive_manager.delete(&output_filename, filename).await?)
    }

    pub async fn archives_cleanup(&self) -> Result<usize, FacadeError> {
        let output_filename = self.store.load_settings()?.output_filename(&self.paths);
        Ok(self.archive_manager.sweep(&output_filename).await?)
    }

    // ---- Jobs ----------------------------------------------------------------

    pub fn job_status(&self) -> Result<JobStatusSnapshot, FacadeError> {
        Ok(JobStatusSnapshot {
            is_busy: self.scheduler.is_busy(),
            next_scheduled_run: self.scheduler.next_scheduled_run(),
            latest_job: self.store.latest_job()?,
        })
    }

    pub fn job_history(&self, limit: i64) -> Result<Vec<JobRow>, FacadeError> {
        Ok(self.store.list_jobs(limit)?)
    }

    pub fn job_latest(&self) -> Result<Option<JobRow>, FacadeError> {
        Ok(self.store.latest_job()?)
    }

    /// Run the full scheduled-style pipeline on demand: Job row, promote,
    /// notify (§4.G `job_execute_now`). Returns `BusyError` if a merge is
    /// already in flight (§8 P5).
    pub async fn job_execute_now(&self) -> Result<MergeReport, FacadeError> {
        Ok(self.scheduler.execute_now().await?)
    }

    pub fn job_clear_history(&self) -> Result<usize, FacadeError> {
        Ok(self.store.clear_jobs()?)
    }

    /// Request cancellation of the in-progress job, if any (§4.G `job_cancel`).
    pub fn job_cancel(&self) -> bool {
        self.scheduler.request_cancel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::r2d2::ConnectionManager;
    use diesel::sqlite::SqliteConnection;

    fn test_facade(tmp: &tempfile::TempDir) -> ContractFacade {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = diesel::r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        let mut conn = pool.get().unwrap();
        crate::store::connection::run_migrations(&mut conn).unwrap();

        let paths = Paths::under(tmp.path());
        paths.ensure_exist().unwrap();
        let store = Arc::new(Store::new(pool, paths.clone()));
        let feed_cache = Arc::new(FeedCache::new(paths.cache_dir.clone()));
        let merge_engine = Arc::new(MergeEngine::new(feed_cache.clone(), paths.tmp_dir.clone()));
        let archive_manager = Arc::new(ArchiveManager::new(store.clone(), &paths));
        let merge_lock = Arc::new(tokio::sync::Mutex::new(()));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            merge_engine.clone(),
            archive_manager.clone(),
            paths.clone(),
            chrono_tz::UTC,
            merge_lock,
        ));

        ContractFacade::new(store, feed_cache, merge_engine, archive_manager, scheduler, paths)
    }

    #[tokio::test]
    async fn save_channels_with_versioning_creates_file_and_row() {
        let tmp = tempfile::tempdir().unwrap();
        let facade = test_facade(&tmp);

        let mut channels = HashSet::new();
        channels.insert("cbc.ca".to_string());
        channels.insert("abc.us".to_string());

        let row = facade.save_channels_with_versioning(channels, 2, "channels.json").await.unwrap();
        assert_eq!(row.channels_count, 2);
        assert_eq!(row.sources_count, 2);
        assert!(tokio::fs::metadata(facade.paths.channels_dir.join("channels.json")).await.is_ok());
        assert_eq!(facade.store.list_selected_channels().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn save_channels_with_versioning_archives_previous_version() {
        let tmp = tempfile::tempdir().unwrap();
        let facade = test_facade(&tmp);

        let mut first = HashSet::new();
        first.insert("cbc.ca".to_string());
        facade.save_channels_with_versioning(first, 1, "channels.json").await.unwrap();

        let mut second = HashSet::new();
        second.insert("cbc.ca".to_string());
        second.insert("abc.us".to_string());
        facade.save_channels_with_versioning(second, 2, "channels.json").await.unwrap();

        let versions = facade.store.list_channel_versions().unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().any(|v| v.filename == "channels.json"));
        assert!(versions.iter().any(|v| v.filename.starts_with("channels.json.")));
    }

    #[tokio::test]
    async fn merge_download_reports_not_found_for_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let facade = test_facade(&tmp);
        let err = facade.merge_download("merged.xml.gz").await.unwrap_err();
        assert!(matches!(err, FacadeError::NotFound(_)));
    }

    #[tokio::test]
    async fn archive_delete_refuses_current_output_filename() {
        let tmp = tempfile::tempdir().unwrap();
        let facade = test_facade(&tmp);
        let err = facade.archive_delete("merged.xml.gz").await.unwrap_err();
        assert!(matches!(err, FacadeError::Validation(_)));
    }

    #[tokio::test]
    async fn job_execute_now_rejects_empty_source_selection() {
        let tmp = tempfile::tempdir().unwrap();
        let facade = test_facade(&tmp);
        let err = facade.job_execute_now().await.unwrap_err();
        assert!(matches!(err, FacadeError::Validation(_)));
    }

    #[tokio::test]
    async fn job_status_reports_idle_with_no_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let facade = test_facade(&tmp);
        let status = facade.job_status().unwrap();
        assert!(!status.is_busy);
        assert!(status.latest_job.is_none());
    }

    #[test]
    fn set_settings_rejects_malformed_discord_webhook() {
        let tmp = tempfile::tempdir().unwrap();
        let facade = test_facade(&tmp);
        let mut values = HashMap::new();
        values.insert(crate::store::settings::DISCORD_WEBHOOK.to_string(), "not a url".to_string());
        let err = facade.set_settings(&values).unwrap_err();
        assert!(matches!(err, FacadeError::Validation(_)));
        assert!(facade.get_settings().unwrap().get(crate::store::settings::DISCORD_WEBHOOK).is_none());
    }

    #[test]
    fn set_settings_accepts_well_formed_discord_webhook() {
        let tmp = tempfile::tempdir().unwrap();
        let facade = test_facade(&tmp);
        let mut values = HashMap::new();
        values.insert(
            crate::store::settings::DISCORD_WEBHOOK.to_string(),
            "https://discord.com/api/webhooks/1/abc".to_string(),
        );
        facade.set_settings(&values).unwrap();
        assert_eq!(
            facade.get_settings().unwrap().get(crate::store::settings::DISCORD_WEBHOOK).unwrap(),
            "https://discord.com/api/webhooks/1/abc"
        );
    }
}
