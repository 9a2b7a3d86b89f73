//! Typed view over the Store's string-valued settings table (§3, §9).
//!
//! The Store itself only ever persists `(key, value)` string pairs — that is
//! an implementation detail. Everything above the Store works with this
//! typed snapshot instead, which parses the JSON-valued keys on read and
//! serialises them back to JSON on write.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value for '{key}': {detail}")]
    Invalid { key: &'static str, detail: String },
}

macro_rules! default_keys {
    ($($konst:ident => $key:literal),+ $(,)?) => {
        $(pub const $konst: &str = $key;)+
    };
}

default_keys! {
    OUTPUT_FILENAME => "output_filename",
    CHANNELS_FILENAME => "channels_filename",
    CURRENT_DIR => "current_dir",
    ARCHIVE_DIR => "archive_dir",
    CHANNELS_DIR => "channels_dir",
    TMP_DIR => "tmp_dir",
    CACHE_DIR => "cache_dir",
    MERGE_SCHEDULE => "merge_schedule",
    MERGE_TIME => "merge_time",
    MERGE_DAYS => "merge_days",
    MERGE_TIMEFRAME => "merge_timeframe",
    MERGE_CHANNELS_VERSION => "merge_channels_version",
    SELECTED_SOURCES => "selected_sources",
    SELECTED_FEED_TYPE => "selected_feed_type",
    DOWNLOAD_TIMEOUT => "download_timeout",
    MERGE_TIMEOUT => "merge_timeout",
    CHANNEL_DROP_THRESHOLD => "channel_drop_threshold",
    ARCHIVE_RETENTION_CLEANUP_EXPIRED => "archive_retention_cleanup_expired",
    DISCORD_WEBHOOK => "discord_webhook",
}

/// Default value for every recognised key, given the resolved data
/// directories (OS-dependent defaults come from `crate::config::Paths`).
pub fn default_for(key: &str, paths: &crate::config::Paths) -> String {
    match key {
        OUTPUT_FILENAME => "merged.xml.gz".to_string(),
        CHANNELS_FILENAME => "channels.json".to_string(),
        CURRENT_DIR => paths.current_dir.to_string_lossy().to_string(),
        ARCHIVE_DIR => paths.archive_dir.to_string_lossy().to_string(),
        CHANNELS_DIR => paths.channels_dir.to_string_lossy().to_string(),
        TMP_DIR => paths.tmp_dir.to_string_lossy().to_string(),
        CACHE_DIR => paths.cache_dir.to_string_lossy().to_string(),
        MERGE_SCHEDULE => "daily".to_string(),
        MERGE_TIME => "00:00".to_string(),
        MERGE_DAYS => "[0,1,2,3,4,5,6]".to_string(),
        MERGE_TIMEFRAME => "3".to_string(),
        MERGE_CHANNELS_VERSION => "channels.json".to_string(),
        SELECTED_SOURCES => "[]".to_string(),
        SELECTED_FEED_TYPE => "iptv".to_string(),
        DOWNLOAD_TIMEOUT => "120".to_string(),
        MERGE_TIMEOUT => "300".to_string(),
        CHANNEL_DROP_THRESHOLD => "".to_string(),
        ARCHIVE_RETENTION_CLEANUP_EXPIRED => "true".to_string(),
        DISCORD_WEBHOOK => "".to_string(),
        _ => "".to_string(),
    }
}

/// All keys the engine recognises and enumerates (§3).
pub const ALL_KEYS: &[&str] = &[
    OUTPUT_FILENAME,
    CHANNELS_FILENAME,
    CURRENT_DIR,
    ARCHIVE_DIR,
    CHANNELS_DIR,
    TMP_DIR,
    CACHE_DIR,
    MERGE_SCHEDULE,
    MERGE_TIME,
    MERGE_DAYS,
    MERGE_TIMEFRAME,
    MERGE_CHANNELS_VERSION,
    SELECTED_SOURCES,
    SELECTED_FEED_TYPE,
    DOWNLOAD_TIMEOUT,
    MERGE_TIMEOUT,
    CHANNEL_DROP_THRESHOLD,
    ARCHIVE_RETENTION_CLEANUP_EXPIRED,
    DISCORD_WEBHOOK,
];

/// Merge schedule cadence (§3 `merge_schedule`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeSchedule {
    Daily,
    Weekly,
}

impl MergeSchedule {
    pub fn parse(s: &str) -> Result<Self, SettingsError> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(SettingsError::Invalid {
                key: MERGE_SCHEDULE,
                detail: format!("must be 'daily' or 'weekly', got '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

/// Upstream feed catalogue (§3 `selected_feed_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Iptv,
    Gracenote,
}

impl FeedType {
    pub fn parse(s: &str) -> Result<Self, SettingsError> {
        match s {
            "iptv" => Ok(Self::Iptv),
            "gracenote" => Ok(Self::Gracenote),
            other => Err(SettingsError::Invalid {
                key: SELECTED_FEED_TYPE,
                detail: format!("must be 'iptv' or 'gracenote', got '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iptv => "iptv",
            Self::Gracenote => "gracenote",
        }
    }
}

/// A typed snapshot of every recognised setting, backed by the Store's raw
/// string map. `raw` is the forward-compatibility escape hatch (§9): keys
/// this struct does not model are still round-tripped through it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub raw: HashMap<String, String>,
}

impl Settings {
    pub fn new(raw: HashMap<String, String>) -> Self {
        Self { raw }
    }

    fn get(&self, key: &str, paths: &crate::config::Paths) -> String {
        self.raw
            .get(key)
            .cloned()
            .unwrap_or_else(|| default_for(key, paths))
    }

    pub fn output_filename(&self, paths: &crate::config::Paths) -> String {
        self.get(OUTPUT_FILENAME, paths)
    }

    pub fn channels_filename(&self, paths: &crate::config::Paths) -> String {
        self.get(CHANNELS_FILENAME, paths)
    }

    pub fn merge_schedule(&self, paths: &crate::config::Paths) -> Result<MergeSchedule, SettingsError> {
        MergeSchedule::parse(&self.get(MERGE_SCHEDULE, paths))
    }

    pub fn merge_time(&self, paths: &crate::config::Paths) -> String {
        self.get(MERGE_TIME, paths)
    }

    /// `merge_days`: JSON array of ints in [0..6], Sun=0 (I4).
    pub fn merge_days(&self, paths: &crate::config::Paths) -> Result<Vec<u8>, SettingsError> {
        let raw = self.get(MERGE_DAYS, paths);
        let days: Vec<u8> = serde_json::from_str(&raw).map_err(|e| SettingsError::Invalid {
            key: MERGE_DAYS,
            detail: e.to_string(),
        })?;
        if days.iter().any(|d| *d > 6) {
            return Err(SettingsError::Invalid {
                key: MERGE_DAYS,
                detail: "values must be in 0..=6".to_string(),
            });
        }
        Ok(days)
    }

    pub fn merge_timeframe(&self, paths: &crate::config::Paths) -> String {
        self.get(MERGE_TIMEFRAME, paths)
    }

    pub fn merge_channels_version(&self, paths: &crate::config::Paths) -> String {
        self.get(MERGE_CHANNELS_VERSION, paths)
    }

    /// `selected_sources`: JSON array of upstream filenames (I4).
    pub fn selected_sources(&self, paths: &crate::config::Paths) -> Result<Vec<String>, SettingsError> {
        let raw = self.get(SELECTED_SOURCES, paths);
        serde_json::from_str(&raw).map_err(|e| SettingsError::Invalid {
            key: SELECTED_SOURCES,
            detail: e.to_string(),
        })
    }

    pub fn selected_feed_type(&self, paths: &crate::config::Paths) -> Result<FeedType, SettingsError> {
        FeedType::parse(&self.get(SELECTED_FEED_TYPE, paths))
    }

    pub fn download_timeout_secs(&self, paths: &crate::config::Paths) -> u64 {
        self.get(DOWNLOAD_TIMEOUT, paths).parse().unwrap_or(120)
    }

    pub fn merge_timeout_secs(&self, paths: &crate::config::Paths) -> u64 {
        self.get(MERGE_TIMEOUT, paths).parse().unwrap_or(300)
    }

    /// Empty string disables the drop-threshold warning (§3, Open Question:
    /// warn-only, never aborts a merge — see DESIGN.md).
    pub fn channel_drop_threshold(&self, paths: &crate::config::Paths) -> Option<u8> {
        let raw = self.get(CHANNEL_DROP_THRESHOLD, paths);
        if raw.trim().is_empty() {
            None
        } else {
            raw.parse().ok()
        }
    }

    pub fn archive_retention_cleanup_expired(&self, paths: &crate::config::Paths) -> bool {
        self.get(ARCHIVE_RETENTION_CLEANUP_EXPIRED, paths) == "true"
    }

    pub fn discord_webhook(&self, paths: &crate::config::Paths) -> Option<String> {
        let raw = self.get(DISCORD_WEBHOOK, paths);
        if raw.trim().is_empty() {
            None
        } else {
            Some(raw)
        }
    }

    pub fn current_dir(&self, paths: &crate::config::Paths) -> String {
        self.get(CURRENT_DIR, paths)
    }

    pub fn archive_dir(&self, paths: &crate::config::Paths) -> String {
        self.get(ARCHIVE_DIR, paths)
    }

    pub fn channels_dir(&self, paths: &crate::config::Paths) -> String {
        self.get(CHANNELS_DIR, paths)
    }

    pub fn tmp_dir(&self, paths: &crate::config::Paths) -> String {
        self.get(TMP_DIR, paths)
    }

    pub fn cache_dir(&self, paths: &crate::config::Paths) -> String {
        self.get(CACHE_DIR, paths)
    }
}

/// Encode a list-valued setting to its JSON string form (I4 round-trip law).
pub fn encode_list<T: Serialize>(values: &[T]) -> String {
    serde_json::to_string(values).expect("list-valued settings are always serialisable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use std::path::PathBuf;

    fn test_paths() -> Paths {
        Paths {
            current_dir: PathBuf::from("/data/current"),
            archive_dir: PathBuf::from("/data/archive"),
            channels_dir: PathBuf::from("/data/channels"),
            tmp_dir: PathBuf::from("/data/tmp"),
            cache_dir: PathBuf::from("/data/cache"),
        }
    }

    #[test]
    fn defaults_materialise_when_key_absent() {
        let settings = Settings::new(HashMap::new());
        let paths = test_paths();
        assert_eq!(settings.output_filename(&paths), "merged.xml.gz");
        assert_eq!(settings.merge_timeout_secs(&paths), 300);
        assert!(settings.discord_webhook(&paths).is_none());
    }

    #[test]
    fn merge_days_round_trips_through_json() {
        let mut raw = HashMap::new();
        let days = vec![0u8, 2, 4];
        raw.insert(MERGE_DAYS.to_string(), encode_list(&days));
        let settings = Settings::new(raw);
        assert_eq!(settings.merge_days(&test_paths()).unwrap(), days);
    }

    #[test]
    fn merge_days_out_of_range_is_rejected() {
        let mut raw = HashMap::new();
        raw.insert(MERGE_DAYS.to_string(), "[0,7]".to_string());
        let settings = Settings::new(raw);
        assert!(settings.merge_days(&test_paths()).is_err());
    }

    #[test]
    fn selected_sources_round_trips_through_json() {
        let mut raw = HashMap::new();
        let sources = vec!["canada_iptv.xml.gz".to_string(), "us_iptv.xml.gz".to_string()];
        raw.insert(SELECTED_SOURCES.to_string(), encode_list(&sources));
        let settings = Settings::new(raw);
        assert_eq!(settings.selected_sources(&test_paths()).unwrap(), sources);
    }

    #[test]
    fn unrecognised_key_survives_in_raw_escape_hatch() {
        let mut raw = HashMap::new();
        raw.insert("future_feature_flag".to_string(), "on".to_string());
        let settings = Settings::new(raw);
        assert_eq!(settings.raw.get("future_feature_flag").unwrap(), "on");
    }
}
