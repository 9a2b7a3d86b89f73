//! Axum handlers over the Facade (§4.G, §6 "Facade HTTP surface"). Each
//! handler does nothing but decode its request, call the matching
//! `ContractFacade` method, and encode the result — no core logic lives
//! here.

use std::collections::{HashMap, HashSet};

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::facade::FacadeError;
use crate::store::settings::FeedType;

use super::state::AppState;

/// Uniform error body (§6: "errors return `{\"detail\": ...}`").
#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for FacadeError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}

fn parse_feed_type(raw: &str) -> Result<FeedType, FacadeError> {
    FeedType::parse(raw).map_err(FacadeError::from)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy".to_string() })
}

pub async fn fallback_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

// ---- Sources & channels ---------------------------------------------------

#[derive(Deserialize)]
pub struct SourcesQuery {
    timeframe: String,
    feed_type: String,
}

pub async fn list_sources(
    State(state): State<AppState>,
    Query(query): Query<SourcesQuery>,
) -> Result<Json<Vec<String>>, FacadeError> {
    let feed_type = parse_feed_type(&query.feed_type)?;
    let sources = state.facade.list_sources(&query.timeframe, feed_type).await?;
    Ok(Json(sources))
}

#[derive(Deserialize)]
pub struct SaveSelectedSourcesBody {
    sources: Vec<String>,
}

pub async fn save_selected_sources(
    State(state): State<AppState>,
    Json(body): Json<SaveSelectedSourcesBody>,
) -> Result<StatusCode, FacadeError> {
    state.facade.save_selected_sources(&body.sources)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<HashMap<String, String>>, FacadeError> {
    Ok(Json(state.facade.get_settings()?))
}

pub async fn set_settings(
    State(state): State<AppState>,
    Json(values): Json<HashMap<String, String>>,
) -> Result<StatusCode, FacadeError> {
    state.facade.set_settings(&values)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SourcesListBody {
    sources: Vec<String>,
}

pub async fn load_channels_from_sources(
    State(state): State<AppState>,
    Json(body): Json<SourcesListBody>,
) -> Result<Json<Vec<String>>, FacadeError> {
    Ok(Json(state.facade.load_channels_from_sources(&body.sources).await?))
}

#[derive(Deserialize)]
pub struct SaveChannelsBody {
    channels: HashSet<String>,
    sources_count: i32,
    filename: String,
}

pub async fn save_channels_with_versioning(
    State(state): State<AppState>,
    Json(body): Json<SaveChannelsBody>,
) -> Result<Json<crate::store::ChannelVersionRow>, FacadeError> {
    let row = state
        .facade
        .save_channels_with_versioning(body.channels, body.sources_count, &body.filename)
        .await?;
    Ok(Json(row))
}

// ---- Merge ------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MergeExecuteBody {
    sources: Vec<String>,
    channels: HashSet<String>,
    timeframe: String,
    feed_type: String,
    output_filename: String,
}

pub async fn merge_execute(
    State(state): State<AppState>,
    Json(body): Json<MergeExecuteBody>,
) -> Result<Json<crate::merge::MergeReport>, FacadeError> {
    let feed_type = parse_feed_type(&body.feed_type)?;
    let report = state
        .facade
        .merge_execute(body.sources, body.channels, body.timeframe, feed_type, body.output_filename)
        .await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
pub struct MergeSaveBody {
    channels: i32,
    programs: i32,
    days_included: i32,
}

pub async fn merge_save(
    State(state): State<AppState>,
    Json(body): Json<MergeSaveBody>,
) -> Result<Json<crate::store::ArchiveRow>, FacadeError> {
    let row = state.facade.merge_save(body.channels, body.programs, body.days_included).await?;
    Ok(Json(row))
}

#[derive(Serialize)]
pub struct ClearTempResponse {
    deleted: usize,
    freed_mb: f64,
}

pub async fn merge_clear_temp(State(state): State<AppState>) -> Result<Json<ClearTempResponse>, FacadeError> {
    let report = state.facade.merge_clear_temp().await?;
    Ok(Json(ClearTempResponse { deleted: report.deleted, freed_mb: report.freed_mb }))
}

pub async fn merge_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, FacadeError> {
    let path = state.facade.merge_download(&filename).await?;
    serve_file(&path, &filename).await
}

// ---- Archives -----------------------------------------------------------------

pub async fn archives_list(State(state): State<AppState>) -> Result<Json<Vec<crate::store::ArchiveRow>>, FacadeError> {
    Ok(Json(state.facade.archives_list()?))
}

pub async fn archives_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, FacadeError> {
    let path = state.facade.archives_download(&filename).await?;
    serve_file(&path, &filename).await
}

pub async fn archive_delete(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<StatusCode, FacadeError> {
    state.facade.archive_delete(&filename).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ArchivesCleanupResponse {
    deleted: usize,
}

pub async fn archives_cleanup(State(state): State<AppState>) -> Result<Json<ArchivesCleanupResponse>, FacadeError> {
    let deleted = state.facade.archives_cleanup().await?;
    Ok(Json(ArchivesCleanupResponse { deleted }))
}

// ---- Jobs -------------------------------------------------------------------

pub async fn job_status(State(state): State<AppState>) -> Result<Json<crate::facade::JobStatusSnapshot>, FacadeError> {
    Ok(Json(state.facade.job_status()?))
}

#[derive(Deserialize)]
pub struct JobHistoryQuery {
    limit: Option<i64>,
}

pub async fn job_history(
    State(state): State<AppState>,
    Query(query): Query<JobHistoryQuery>,
) -> Result<Json<Vec<crate::store::JobRow>>, FacadeError> {
    Ok(Json(state.facade.job_history(query.limit.unwrap_or(50))?))
}

pub async fn job_latest(State(state): State<AppState>) -> Result<Json<Option<crate::store::JobRow>>, FacadeError> {
    Ok(Json(state.facade.job_latest()?))
}

pub async fn job_execute_now(State(state): State<AppState>) -> Result<Json<crate::merge::MergeReport>, FacadeError> {
    Ok(Json(state.facade.job_execute_now().await?))
}

#[derive(Serialize)]
pub struct ClearHistoryResponse {
    deleted: usize,
}

pub async fn job_clear_history(State(state): State<AppState>) -> Result<Json<ClearHistoryResponse>, FacadeError> {
    let deleted = state.facade.job_clear_history()?;
    Ok(Json(ClearHistoryResponse { deleted }))
}

#[derive(Serialize)]
pub struct JobCancelResponse {
    cancelled: bool,
}

pub async fn job_cancel(State(state): State<AppState>) -> Json<JobCancelResponse> {
    Json(JobCancelResponse { cancelled: state.facade.job_cancel() })
}

// ---- Shared file-download helper ---------------------------------------------

async fn serve_file(path: &std::path::Path, filename: &str) -> Result<Response, FacadeError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| FacadeError::Internal(e.to_string()))?;

    let content_type = if filename.ends_with(".gz") { "application/gzip" } else { "application/xml" };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        bytes,
    )
        .into_response())
}
