//! Parley server library logic.

pub mod api_runs;
pub mod api_webhooks;
pub mod background;
pub mod config;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use parley_db::DbPool;
use parley_engine::SessionEngine;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// The session orchestration engine.
    pub engine: Arc<SessionEngine>,
}

/// Maximum request body size (256 KiB). Run payloads are small; this guards
/// against oversized submissions.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/runs",
            post(api_runs::start_run_handler).get(api_runs::list_runs_handler),
        )
        .route("/api/runs/{runId}", get(api_runs::get_run_handler))
        .route(
            "/api/runs/{runId}/transcript",
            get(api_runs::get_transcript_handler),
        )
        .route(
            "/api/runs/{runId}/turns",
            post(api_runs::process_turn_handler),
        )
        .route("/api/runs/{runId}/end", post(api_runs::end_run_handler))
        .route("/api/runs/{runId}/fix", post(api_runs::fix_run_handler))
        .route(
            "/webhooks/calls/{runId}/initiated",
            post(api_webhooks::call_initiated_handler),
        )
        .route(
            "/webhooks/calls/{runId}/speech",
            post(api_webhooks::speech_handler),
        )
        .route(
            "/webhooks/calls/{runId}/status",
            post(api_webhooks::status_handler),
        )
        .route(
            "/webhooks/calls/{runId}/recording",
            post(api_webhooks::recording_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
