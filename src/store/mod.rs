//! The Store (§4.A): durable key/value settings, selected-channel set,
//! archive metadata, job history, and channel-version metadata, backed by a
//! single embedded SQLite file accessed through a pooled `diesel` connection.

pub mod connection;
pub mod error;
pub mod models;
pub mod schema;
pub mod settings;

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;

pub use connection::{build_pool, DbPool, DbPooledConnection};
pub use error::StoreError;
pub use models::{ArchiveRow, ChannelVersionRow, JobFinish, JobRow, NewJobRow};
pub use settings::Settings;

use crate::config::Paths;

/// Jobs in `running` longer than this are presumed to belong to a process
/// that died without recording a terminal state (§4.E "Stuck-job recovery").
pub const STUCK_JOB_THRESHOLD_SECS: i64 = 2 * 60 * 60;

#[derive(Clone)]
pub struct Store {
    pool: DbPool,
    default_paths: Paths,
}

impl Store {
    pub fn new(pool: DbPool, default_paths: Paths) -> Self {
        Self { pool, default_paths }
    }

    fn conn(&self) -> Result<DbPooledConnection, StoreError> {
        Ok(self.pool.get()?)
    }

    // ---- Settings -------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<String, StoreError> {
        use schema::settings::dsl;

        let mut conn = self.conn()?;
        let found = dsl::settings
            .filter(dsl::key.eq(key))
            .select(dsl::value)
            .first::<String>(&mut conn)
            .optional()?;

        Ok(found.unwrap_or_else(|| settings::default_for(key, &self.default_paths)))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        use schema::settings::dsl;

        let mut conn = self.conn()?;
        diesel::insert_into(dsl::settings)
            .values(models::SettingRow {
                key: key.to_string(),
                value: value.to_string(),
            })
            .on_conflict(dsl::key)
            .do_update()
            .set(dsl::value.eq(value))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Load every recognised key plus whatever else is in the table, as a
    /// typed `Settings` snapshot (§9).
    pub fn load_settings(&self) -> Result<Settings, StoreError> {
        use schema::settings::dsl;

        let mut conn = self.conn()?;
        let rows: Vec<(String, String)> = dsl::settings.select((dsl::key, dsl::value)).load(&mut conn)?;
        let mut raw: HashMap<String, String> = rows.into_iter().collect();

        for key in settings::ALL_KEYS {
            raw.entry((*key).to_string())
                .or_insert_with(|| settings::default_for(key, &self.default_paths));
        }

        Ok(Settings::new(raw))
    }

    pub fn set_settings(&self, values: &HashMap<String, String>) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.transaction(|tx| {
            use schema::settings::dsl;
            for (key, value) in values {
                diesel::insert_into(dsl::settings)
                    .values(models::SettingRow {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .on_conflict(dsl::key)
                    .do_update()
                    .set(dsl::value.eq(value))
                    .execute(tx)?;
            }
            Ok::<_, diesel::result::Error>(())
        })?;
        Ok(())
    }

    pub fn default_paths(&self) -> &Paths {
        &self.default_paths
    }

    // ---- Selected channels ------------------------------------------------

    pub fn replace_selected_channels(&self, channels: &std::collections::HashSet<String>) -> Result<(), StoreError> {
        use schema::selected_channels::dsl;

        let mut conn = self.conn()?;
        conn.transaction(|tx| {
            diesel::delete(dsl::selected_channels).execute(tx)?;
            let rows: Vec<models::SelectedChannelRow> = channels
                .iter()
                .map(|c| models::SelectedChannelRow { channel_id: c.clone() })
                .collect();
            if !rows.is_empty() {
                diesel::insert_into(dsl::selected_channels).values(&rows).execute(tx)?;
            }
            Ok::<_, diesel::result::Error>(())
        })?;
        Ok(())
    }

    pub fn list_selected_channels(&self) -> Result<std::collections::HashSet<String>, StoreError> {
        use schema::selected_channels::dsl;

        let mut conn = self.conn()?;
        let ids: Vec<String> = dsl::selected_channels.select(dsl::channel_id).load(&mut conn)?;
        Ok(ids.into_iter().collect())
    }

    // ---- Archives ----------------------------------------------------------

    pub fn upsert_archive(&self, archive: &ArchiveRow) -> Result<(), StoreError> {
        use schema::archives::dsl;

        let mut conn = self.conn()?;
        diesel::insert_into(dsl::archives)
            .values(archive)
            .on_conflict(dsl::filename)
            .do_update()
            .set(archive)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_archive(&self, filename: &str) -> Result<Option<ArchiveRow>, StoreError> {
        use schema::archives::dsl;

        let mut conn = self.conn()?;
        Ok(dsl::archives
            .filter(dsl::filename.eq(filename))
            .first::<ArchiveRow>(&mut conn)
            .optional()?)
    }

    pub fn list_archives(&self) -> Result<Vec<ArchiveRow>, StoreError> {
        use schema::archives::dsl;

        let mut conn = self.conn()?;
        Ok(dsl::archives.order(dsl::created_at.desc()).load(&mut conn)?)
    }

    pub fn delete_archive(&self, filename: &str) -> Result<(), StoreError> {
        use schema::archives::dsl;

        let mut conn = self.conn()?;
        let deleted = diesel::delete(dsl::archives.filter(dsl::filename.eq(filename))).execute(&mut conn)?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("archive '{filename}'")));
        }
        Ok(())
    }

    // ---- Channel versions ----------------------------------------------------

    pub fn upsert_channel_version(&self, version: &ChannelVersionRow) -> Result<(), StoreError> {
        use schema::channel_versions::dsl;

        let mut conn = self.conn()?;
        diesel::insert_into(dsl::channel_versions)
            .values(version)
            .on_conflict(dsl::filename)
            .do_update()
            .set(version)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn list_channel_versions(&self) -> Result<Vec<ChannelVersionRow>, StoreError> {
        use schema::channel_versions::dsl;

        let mut conn = self.conn()?;
        Ok(dsl::channel_versions.order(dsl::created_at.desc()).load(&mut conn)?)
    }

    pub fn delete_channel_version(&self, filename: &str) -> Result<(), StoreError> {
        use schema::channel_versions::dsl;

        let mut conn = self.conn()?;
        let deleted =
            diesel::delete(dsl::channel_versions.filter(dsl::filename.eq(filename))).execute(&mut conn)?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("channel version '{filename}'")));
        }
        Ok(())
    }

    // ---- Jobs ----------------------------------------------------------------

    pub fn create_job(&self, job_id: &str, started_at: chrono::DateTime<Utc>) -> Result<JobRow, StoreError> {
        use schema::jobs::dsl;

        let mut conn = self.conn()?;
        diesel::insert_into(dsl::jobs)
            .values(NewJobRow {
                job_id: job_id.to_string(),
                status: "pending".to_string(),
                started_at: started_at.to_rfc3339(),
            })
            .execute(&mut conn)?;

        Ok(dsl::jobs.filter(dsl::job_id.eq(job_id)).first(&mut conn)?)
    }

    pub fn set_job_running(&self, job_id: &str) -> Result<(), StoreError> {
        use schema::jobs::dsl;

        let mut conn = self.conn()?;
        diesel::update(dsl::jobs.filter(dsl::job_id.eq(job_id)))
            .set(dsl::status.eq("running"))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn finish_job(&self, job_id: &str, fields: JobFinish) -> Result<(), StoreError> {
        use schema::jobs::dsl;

        let mut conn = self.conn()?;
        diesel::update(dsl::jobs.filter(dsl::job_id.eq(job_id)))
            .set(&fields)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Any job in `running` whose `started_at` predates `now - threshold` is
    /// transitioned to `failed` (§4.A, §4.E). Returns the number of rows
    /// recovered.
    pub fn mark_stuck_jobs_failed(&self, now: chrono::DateTime<Utc>, error_message: &str) -> Result<usize, StoreError> {
        use schema::jobs::dsl;

        let cutoff = (now - chrono::Duration::seconds(STUCK_JOB_THRESHOLD_SECS)).to_rfc3339();

        let mut conn = self.conn()?;
        let updated = diesel::update(
            dsl::jobs
                .filter(dsl::status.eq("running"))
                .filter(dsl::started_at.lt(cutoff)),
        )
        .set((
            dsl::status.eq("failed"),
            dsl::error_message.eq(error_message),
            dsl::completed_at.eq(now.to_rfc3339()),
        ))
        .execute(&mut conn)?;

        Ok(updated)
    }

    pub fn list_jobs(&self, limit: i64) -> Result<Vec<JobRow>, StoreError> {
        use schema::jobs::dsl;

        let mut conn = self.conn()?;
        Ok(dsl::jobs
            .order(dsl::started_at.desc())
            .limit(limit)
            .load(&mut conn)?)
    }

    pub fn latest_job(&self) -> Result<Option<JobRow>, StoreError> {
        use schema::jobs::dsl;

        let mut conn = self.conn()?;
        Ok(dsl::jobs
            .order(dsl::started_at.desc())
            .first(&mut conn)
            .optional()?)
    }

    pub fn is_job_running(&self) -> Result<bool, StoreError> {
        use schema::jobs::dsl;

        let mut conn = self.conn()?;
        let count: i64 = dsl::jobs.filter(dsl::status.eq("running")).count().get_result(&mut conn)?;
        Ok(count > 0)
    }

    pub fn clear_jobs(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        Ok(diesel::delete(schema::jobs::dsl::jobs).execute(&mut conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::r2d2::ConnectionManager;
    use diesel::sqlite::SqliteConnection;

    fn test_store() -> Store {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = diesel::r2d2::Pool::builder()
            .max_size(1)
            .build(manager)
            .unwrap();
        let mut conn = pool.get().unwrap();
        connection::run_migrations(&mut conn).unwrap();

        let paths = Paths {
            current_dir: "/data/current".into(),
            archive_dir: "/data/archive".into(),
            channels_dir: "/data/channels".into(),
            tmp_dir: "/data/tmp".into(),
            cache_dir: "/data/cache".into(),
        };
        Store::new(pool, paths)
    }

    #[test]
    fn unknown_setting_returns_default() {
        let store = test_store();
        assert_eq!(store.get_setting(settings::OUTPUT_FILENAME).unwrap(), "merged.xml.gz");
    }

    #[test]
    fn set_then_get_setting_round_trips() {
        let store = test_store();
        store.set_setting(settings::MERGE_SCHEDULE, "weekly").unwrap();
        assert_eq!(store.get_setting(settings::MERGE_SCHEDULE).unwrap(), "weekly");
    }

    #[test]
    fn replace_selected_channels_is_atomic_overwrite() {
        let store = test_store();
        let mut first = std::collections::HashSet::new();
        first.insert("cbc.ca".to_string());
        store.replace_selected_channels(&first).unwrap();
        assert_eq!(store.list_selected_channels().unwrap(), first);

        let mut second = std::collections::HashSet::new();
        second.insert("abc.us".to_string());
        store.replace_selected_channels(&second).unwrap();
        assert_eq!(store.list_selected_channels().unwrap(), second);
    }

    #[test]
    fn only_one_job_running_at_a_time_is_enforced_by_caller() {
        let store = test_store();
        let now = Utc::now();
        store.create_job("scheduled_merge_20260101_000000", now).unwrap();
        store.set_job_running("scheduled_merge_20260101_000000").unwrap();
        assert!(store.is_job_running().unwrap());
    }

    #[test]
    fn mark_stuck_jobs_failed_only_affects_old_running_jobs() {
        let store = test_store();
        let old = Utc::now() - chrono::Duration::hours(3);
        store.create_job("scheduled_merge_old", old).unwrap();
        store.set_job_running("scheduled_merge_old").unwrap();

        let recent = Utc::now();
        store.create_job("scheduled_merge_recent", recent).unwrap();
        store.set_job_running("scheduled_merge_recent").unwrap();

        let recovered = store
            .mark_stuck_jobs_failed(Utc::now(), "Stuck job recovered on startup")
            .unwrap();
        assert_eq!(recovered, 1);

        let jobs = store.list_jobs(10).unwrap();
        let old_job = jobs.iter().find(|j| j.job_id == "scheduled_merge_old").unwrap();
        assert_eq!(old_job.status, "failed");
        let recent_job = jobs.iter().find(|j| j.job_id == "scheduled_merge_recent").unwrap();
        assert_eq!(recent_job.status, "running");
    }

    #[test]
    fn delete_archive_missing_file_errors_not_found() {
        let store = test_store();
        assert!(store.delete_archive("missing.xml.gz").is_err());
    }
}
