use diesel::prelude::*;
use serde::Serialize;

use super::schema::{archives, channel_versions, jobs, selected_channels, settings};

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = settings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SettingRow {
    pub key: String,
    pub value: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = selected_channels)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SelectedChannelRow {
    pub channel_id: String,
}

/// An `Archive` row (§3): the current file has no timestamp suffix, every
/// archived one does.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, Serialize)]
#[diesel(table_name = archives)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ArchiveRow {
    pub filename: String,
    pub created_at: String,
    pub channels: i32,
    pub programs: i32,
    pub days_included: i32,
    pub size_bytes: i64,
}

/// A `ChannelVersion` row (§3).
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, Serialize)]
#[diesel(table_name = channel_versions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChannelVersionRow {
    pub filename: String,
    pub created_at: String,
    pub sources_count: i32,
    pub channels_count: i32,
    pub size_bytes: i64,
}

/// A `Job` row (§3). `status` is one of pending/running/success/failed/timeout;
/// modelled as a plain `Text` column so additive schema changes never need a
/// migration for new terminal states.
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRow {
    pub job_id: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub merge_filename: Option<String>,
    pub channels_included: Option<i32>,
    pub programs_included: Option<i32>,
    pub file_size: Option<String>,
    pub peak_memory_mb: Option<f64>,
    pub days_included: Option<i32>,
    pub error_message: Option<String>,
    pub execution_time_seconds: Option<f64>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewJobRow {
    pub job_id: String,
    pub status: String,
    pub started_at: String,
}

#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobFinish {
    pub status: Option<String>,
    pub completed_at: Option<String>,
    pub merge_filename: Option<String>,
    pub channels_included: Option<i32>,
    pub programs_included: Option<i32>,
    pub file_size: Option<String>,
    pub peak_memory_mb: Option<f64>,
    pub days_included: Option<i32>,
    pub error_message: Option<String>,
    pub execution_time_seconds: Option<f64>,
}
