use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{BoxError, Router};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Requests older than this are aborted server-side rather than left to
/// hang on a stuck handler; well above the longest single Facade call
/// (`merge_execute` bounds itself with its own `merge_timeout` setting).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// `/api/...` surface per §4.G/§6; one route per Facade operation. CORS is
/// wide open since the browser UI this serves (§1: out of core scope) may be
/// hosted on a different origin than the API process; request/response
/// spans come from `TraceLayer`, feeding the same `tracing` subscriber every
/// other component logs through.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/sources", get(handlers::list_sources))
        .route("/api/sources/selected", post(handlers::save_selected_sources))
        .route("/api/settings", get(handlers::get_settings).put(handlers::set_settings))
        .route("/api/channels/from-sources", post(handlers::load_channels_from_sources))
        .route("/api/channels", post(handlers::save_channels_with_versioning))
        .route("/api/merge/execute", post(handlers::merge_execute))
        .route("/api/merge/save", post(handlers::merge_save))
        .route("/api/merge/clear-temp", post(handlers::merge_clear_temp))
        .route("/api/merge/download/{filename}", get(handlers::merge_download))
        .route("/api/archives", get(handlers::archives_list))
        .route("/api/archives/download/{filename}", get(handlers::archives_download))
        .route("/api/archives/{filename}", delete(handlers::archive_delete))
        .route("/api/archives/cleanup", post(handlers::archives_cleanup))
        .route("/api/jobs/status", get(handlers::job_status))
        .route("/api/jobs/history", get(handlers::job_history).delete(handlers::job_clear_history))
        .route("/api/jobs/latest", get(handlers::job_latest))
        .route("/api/jobs/execute-now", post(handlers::job_execute_now))
        .route("/api/jobs/cancel", post(handlers::job_cancel))
        .fallback(handlers::fallback_handler)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .timeout(REQUEST_TIMEOUT)
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn handle_timeout_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request exceeded the server's timeout".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}
