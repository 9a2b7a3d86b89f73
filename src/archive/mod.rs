//! ArchiveManager (§4.D): temp-file promotion, timestamped archiving, and
//! retention cleanup for the merged output.

pub mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use error::ArchiveError;

use crate::config::Paths;
use crate::store::{ArchiveRow, Store};

pub struct ArchiveManager {
    store: Arc<Store>,
    current_dir: PathBuf,
    archive_dir: PathBuf,
    tmp_dir: PathBuf,
}

/// Report of a `clear_temp` sweep (§4.D).
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearTempReport {
    pub deleted: usize,
    pub freed_mb: f64,
}

impl ArchiveManager {
    pub fn new(store: Arc<Store>, paths: &Paths) -> Self {
        Self {
            store,
            current_dir: paths.current_dir.clone(),
            archive_dir: paths.archive_dir.clone(),
            tmp_dir: paths.tmp_dir.clone(),
        }
    }

    /// Move `tmp_dir/<output_filename>` into `current_dir`, archiving any
    /// prior current file first (§4.D `promote`).
    pub async fn promote(
        &self,
        output_filename: &str,
        channels: i32,
        programs: i32,
        days_included: i32,
    ) -> Result<ArchiveRow, ArchiveError> {
        let temp_path = self.tmp_dir.join(output_filename);
        if tokio::fs::metadata(&temp_path).await.is_err() {
            return Err(ArchiveError::NotFound(format!(
                "merge temp output '{}' does not exist",
                temp_path.display()
            )));
        }

        let current_path = self.current_dir.join(output_filename);
        if tokio::fs::metadata(&current_path).await.is_ok() {
            self.archive_current(output_filename, &current_path).await?;
        }

        move_file(&temp_path, &current_path).await?;

        let size_bytes = tokio::fs::metadata(&current_path).await?.len() as i64;
        let created_at = Utc::now();
        let row = ArchiveRow {
            filename: output_filename.to_string(),
            created_at: created_at.to_rfc3339(),
            channels,
            programs,
            days_included,
            size_bytes,
        };
        self.store.upsert_archive(&row)?;

        if self.store.load_settings()?.archive_retention_cleanup_expired(self.store.default_paths()) {
            self.sweep(output_filename).await?;
        }

        Ok(row)
    }

    /// Archive the existing current file under a `.YYYYMMDD_HHMMSS` suffix,
    /// preserving its known metadata (or synthesising it from disk).
    async fn archive_current(&self, output_filename: &str, current_path: &Path) -> Result<(), ArchiveError> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let archived_name = format!("{output_filename}.{timestamp}");
        let archived_path = self.archive_dir.join(&archived_name);

        if let Some(parent) = archived_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let previous_row = self.store.get_archive(output_filename)?;
        move_file(current_path, &archived_path).await?;

        let row = match previous_row {
            Some(previous) => ArchiveRow { filename: archived_name, ..previous },
            None => {
                let size_bytes = tokio::fs::metadata(&archived_path).await?.len() as i64;
                ArchiveRow {
                    filename: archived_name,
                    created_at: Utc::now().to_rfc3339(),
                    channels: 0,
                    programs: 0,
                    days_included: 0,
                    size_bytes,
                }
            }
        };
        self.store.upsert_archive(&row)?;
        Ok(())
    }

    /// Delete every regular file in `tmp_dir` (§4.D `clear_temp`).
    pub async fn clear_temp(&self) -> Result<ClearTempReport, ArchiveError> {
        let mut report = ClearTempReport::default();
        let mut entries = match tokio::fs::read_dir(&self.tmp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                report.freed_mb += metadata.len() as f64 / (1024.0 * 1024.0);
                tokio::fs::remove_file(entry.path()).await?;
                report.deleted += 1;
            }
        }

        Ok(report)
    }

    /// Delete any archive whose programming window has entirely elapsed
    /// (§4.D `sweep`, §8 P8). The current file (`output_filename`) is exempt.
    pub async fn sweep(&self, output_filename: &str) -> Result<usize, ArchiveError> {
        let today = Utc::now().date_naive();
        let mut deleted = 0usize;

        for row in self.store.list_archives()? {
            if row.filename == output_filename {
                continue;
            }

            let created_at = DateTime::parse_from_rfc3339(&row.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let expires_on = created_at.date_naive() + chrono::Duration::days(row.days_included as i64);

            if expires_on < today {
                let path = self.archive_dir.join(&row.filename);
                let _ = tokio::fs::remove_file(&path).await;
                self.store.delete_archive(&row.filename)?;
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    /// Delete an archived file and its row (§4.D `delete`). The current
    /// output file can never be deleted this way.
    pub async fn delete(&self, output_filename: &str, filename: &str) -> Result<(), ArchiveError> {
        if filename == output_filename {
            return Err(ArchiveError::ConflictDeletion(format!(
                "'{filename}' is the current merged file and cannot be deleted"
            )));
        }

        let path = self.archive_dir.join(filename);
        let file_existed = tokio::fs::remove_file(&path).await.is_ok();
        let row_existed = self.store.get_archive(filename)?.is_some();

        if row_existed {
            self.store.delete_archive(filename)?;
        }

        if !file_existed && !row_existed {
            return Err(ArchiveError::NotFound(format!("archive '{filename}'")));
        }

        Ok(())
    }

    /// Resolve the on-disk path for either the current file or an archived
    /// one (§4.D `path_for`).
    pub fn path_for(&self, output_filename: &str, filename: &str) -> PathBuf {
        if filename == output_filename {
            self.current_dir.join(filename)
        } else {
            self.archive_dir.join(filename)
        }
    }
}

/// Rename across the same filesystem; fall back to copy+fsync+unlink when
/// source and destination are on different filesystems (§4.D step 3, §5
/// "temp-then-rename").
async fn move_file(from: &Path, to: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            let file = tokio::fs::File::open(to).await?;
            file.sync_all().await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::r2d2::ConnectionManager;
    use diesel::sqlite::SqliteConnection;

    fn test_store(data_dir: &Path) -> Arc<Store> {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = diesel::r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        let mut conn = pool.get().unwrap();
        crate::store::connection::run_migrations(&mut conn).unwrap();
        Arc::new(Store::new(pool, Paths::under(data_dir)))
    }

    async fn manager_with_dirs(tmp: &tempfile::TempDir) -> ArchiveManager {
        let paths = Paths::under(tmp.path());
        paths.ensure_exist().unwrap();
        let store = test_store(tmp.path());
        ArchiveManager::new(store, &paths)
    }

    #[tokio::test]
    async fn promote_with_no_previous_current_creates_only_current_file() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager_with_dirs(&tmp).await;
        tokio::fs::write(manager.tmp_dir.join("merged.xml.gz"), b"data").await.unwrap();

        manager.promote("merged.xml.gz", 2, 5, 3).await.unwrap();

        assert!(tokio::fs::metadata(manager.current_dir.join("merged.xml.gz")).await.is_ok());
        assert!(manager.store.list_archives().unwrap().len() == 1);
    }

    #[tokio::test]
    async fn promote_with_existing_current_archives_it() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager_with_dirs(&tmp).await;

        tokio::fs::write(manager.current_dir.join("merged.xml.gz"), b"old").await.unwrap();
        manager
            .store
            .upsert_archive(&ArchiveRow {
                filename: "merged.xml.gz".to_string(),
                created_at: Utc::now().to_rfc3339(),
                channels: 1,
                programs: 1,
                days_included: 3,
                size_bytes: 3,
            })
            .unwrap();

        tokio::fs::write(manager.tmp_dir.join("merged.xml.gz"), b"new data").await.unwrap();
        manager.promote("merged.xml.gz", 2, 5, 3).await.unwrap();

        let archives = manager.store.list_archives().unwrap();
        assert_eq!(archives.len(), 2);
        assert!(archives.iter().any(|a| a.filename.starts_with("merged.xml.gz.") ));
        assert!(archives.iter().any(|a| a.filename == "merged.xml.gz"));
    }

    #[tokio::test]
    async fn delete_refuses_current_file() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager_with_dirs(&tmp).await;
        let err = manager.delete("merged.xml.gz", "merged.xml.gz").await.unwrap_err();
        assert!(matches!(err, ArchiveError::ConflictDeletion(_)));
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_archives() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager_with_dirs(&tmp).await;

        let expired = Utc::now() - chrono::Duration::days(10);
        manager
            .store
            .upsert_archive(&ArchiveRow {
                filename: "merged.xml.gz.20250101_000000".to_string(),
                created_at: expired.to_rfc3339(),
                channels: 1,
                programs: 1,
                days_included: 3,
                size_bytes: 10,
            })
            .unwrap();
        tokio::fs::write(manager.archive_dir.join("merged.xml.gz.20250101_000000"), b"x")
            .await
            .unwrap();

        manager
            .store
            .upsert_archive(&ArchiveRow {
                filename: "merged.xml.gz.20260101_000000".to_string(),
                created_at: Utc::now().to_rfc3339(),
                channels: 1,
                programs: 1,
                days_included: 30,
                size_bytes: 10,
            })
            .unwrap();

        let deleted = manager.sweep("merged.xml.gz").await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = manager.store.list_archives().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].filename, "merged.xml.gz.20260101_000000");
    }

    #[tokio::test]
    async fn clear_temp_reports_deleted_count_and_freed_size() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager_with_dirs(&tmp).await;
        tokio::fs::write(manager.tmp_dir.join("a.xml.gz"), vec![0u8; 1024]).await.unwrap();
        tokio::fs::write(manager.tmp_dir.join("b.xml.gz"), vec![0u8; 2048]).await.unwrap();

        let report = manager.clear_temp().await.unwrap();
        assert_eq!(report.deleted, 2);
        assert!(report.freed_mb > 0.0);
    }
}
