//! End-to-end tests of the streaming merge pipeline (§4.C) against small
//! fixture XMLTV documents served by a local mock HTTP server, in place of
//! the real `https://share.jesmann.com` origin (§8 S1, P3, P4, B2).

use std::collections::HashSet;
use std::io::Read;
use std::time::Duration;

use epg_merged::feed_cache::FeedCache;
use epg_merged::merge::{MergeEngine, MergeRequest};
use epg_merged::store::settings::FeedType;
use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CANADA_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv>
<channel id="cbc.ca"><display-name>CBC</display-name></channel>
<channel id="ctv.ca"><display-name>CTV</display-name></channel>
<programme channel="cbc.ca" start="20260119120000 +0000" stop="20260119130000 +0000"><title>News Hour</title></programme>
<programme channel="ctv.ca" start="20260119120000 +0000" stop="20260119130000 +0000"><title>Unwanted</title></programme>
</tv>"#;

const US_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv>
<channel id="abc.us"><display-name>ABC</display-name></channel>
<channel id="cbc.ca"><display-name>CBC (regional dup)</display-name></channel>
<programme channel="abc.us" start="20260119140000 +0000" stop="20260119150000 +0000"><title>Evening News</title></programme>
<programme channel="cbc.ca" start="20260119120000 +0000" stop="20260119130000 +0000"><title>News Hour</title></programme>
</tv>"#;

async fn mount_feeds(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/3day/iptv/canada_iptv.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(CANADA_FEED.as_bytes().to_vec()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/3day/iptv/us_iptv.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(US_FEED.as_bytes().to_vec()))
        .mount(server)
        .await;
}

fn decompress(bytes: &[u8]) -> String {
    let mut out = String::new();
    GzDecoder::new(bytes).read_to_string(&mut out).expect("valid gzip");
    out
}

#[tokio::test]
async fn merge_filters_channels_and_dedups_programmes_across_sources() {
    let server = MockServer::start().await;
    mount_feeds(&server).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let tmp_dir = tempfile::tempdir().unwrap();
    let feed_cache = std::sync::Arc::new(FeedCache::with_base_url(
        cache_dir.path().to_path_buf(),
        format!("{}/", server.uri()),
    ));
    let engine = MergeEngine::new(feed_cache, tmp_dir.path().to_path_buf());

    let mut channels = HashSet::new();
    channels.insert("cbc.ca".to_string());
    channels.insert("abc.us".to_string());

    let request = MergeRequest {
        sources: vec!["canada_iptv.xml".to_string(), "us_iptv.xml".to_string()],
        channels,
        timeframe: "3".to_string(),
        feed_type: FeedType::Iptv,
        output_filename: "merged.xml.gz".to_string(),
        download_timeout: Duration::from_secs(10),
        merge_timeout: Duration::from_secs(10),
    };

    let report = engine.run(request, CancellationToken::new()).await.unwrap();

    assert_eq!(report.channels_included, 2, "ctv.ca was never selected");
    assert_eq!(
        report.programs_included, 2,
        "cbc.ca's News Hour appears in both feeds with an identical key and must be deduplicated"
    );

    let output_bytes = tokio::fs::read(tmp_dir.path().join("merged.xml.gz")).await.unwrap();
    let xml = decompress(&output_bytes);
    assert!(xml.contains("cbc.ca"));
    assert!(xml.contains("abc.us"));
    assert!(!xml.contains("ctv.ca"), "unselected channel must not appear in output");
    assert!(xml.contains("<tv"));
}

#[tokio::test]
async fn merge_with_zero_matching_programmes_still_produces_valid_gzip_document() {
    let server = MockServer::start().await;
    mount_feeds(&server).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let tmp_dir = tempfile::tempdir().unwrap();
    let feed_cache = std::sync::Arc::new(FeedCache::with_base_url(
        cache_dir.path().to_path_buf(),
        format!("{}/", server.uri()),
    ));
    let engine = MergeEngine::new(feed_cache, tmp_dir.path().to_path_buf());

    let mut channels = HashSet::new();
    channels.insert("nonexistent.channel".to_string());

    let request = MergeRequest {
        sources: vec!["canada_iptv.xml".to_string()],
        channels,
        timeframe: "3".to_string(),
        feed_type: FeedType::Iptv,
        output_filename: "merged.xml.gz".to_string(),
        download_timeout: Duration::from_secs(10),
        merge_timeout: Duration::from_secs(10),
    };

    let report = engine.run(request, CancellationToken::new()).await.unwrap();
    assert_eq!(report.channels_included, 0);
    assert_eq!(report.programs_included, 0);

    let output_bytes = tokio::fs::read(tmp_dir.path().join("merged.xml.gz")).await.unwrap();
    let xml = decompress(&output_bytes);
    assert_eq!(xml, "<tv></tv>");
}

#[tokio::test]
async fn merge_rejects_empty_sources_before_any_network_io() {
    let cache_dir = tempfile::tempdir().unwrap();
    let tmp_dir = tempfile::tempdir().unwrap();
    let feed_cache = std::sync::Arc::new(FeedCache::new(cache_dir.path().to_path_buf()));
    let engine = MergeEngine::new(feed_cache, tmp_dir.path().to_path_buf());

    let request = MergeRequest {
        sources: vec![],
        channels: ["cbc.ca".to_string()].into_iter().collect(),
        timeframe: "3".to_string(),
        feed_type: FeedType::Iptv,
        output_filename: "merged.xml.gz".to_string(),
        download_timeout: Duration::from_secs(5),
        merge_timeout: Duration::from_secs(5),
    };

    let err = engine.run(request, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, epg_merged::merge::MergeError::Configuration(_)));
}

#[tokio::test]
async fn upstream_failure_leaves_no_partial_output_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/3day/iptv/broken.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cache_dir = tempfile::tempdir().unwrap();
    let tmp_dir = tempfile::tempdir().unwrap();
    let feed_cache = std::sync::Arc::new(FeedCache::with_base_url(
        cache_dir.path().to_path_buf(),
        format!("{}/", server.uri()),
    ));
    let engine = MergeEngine::new(feed_cache, tmp_dir.path().to_path_buf());

    let request = MergeRequest {
        sources: vec!["broken.xml".to_string()],
        channels: ["cbc.ca".to_string()].into_iter().collect(),
        timeframe: "3".to_string(),
        feed_type: FeedType::Iptv,
        output_filename: "merged.xml.gz".to_string(),
        download_timeout: Duration::from_secs(5),
        merge_timeout: Duration::from_secs(5),
    };

    let err = engine.run(request, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, epg_merged::merge::MergeError::UpstreamUnavailable(_)));
    assert!(tokio::fs::metadata(tmp_dir.path().join("merged.xml.gz")).await.is_err());
}
