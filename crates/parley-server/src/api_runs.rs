//! Run lifecycle API handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use parley_engine::EngineError;
use parley_runs::{Run, RunFilter, TranscriptEntry};
use parley_types::{Channel, Disposition, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;

/// An engine failure mapped to a wire status.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::InvalidState { .. } | EngineError::StaleEvent { .. } => {
                (StatusCode::CONFLICT, self.0.to_string())
            }
            EngineError::ConcurrencyExceeded { .. } => {
                let body = Json(json!({ "error": self.0.to_string() }));
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, "5")],
                    body,
                )
                    .into_response();
            }
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            EngineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            EngineError::Provider(err) => {
                tracing::error!(error = %err, "provider failure surfaced to client");
                (StatusCode::BAD_GATEWAY, "provider unavailable".to_string())
            }
            EngineError::Store(err) => {
                tracing::error!(error = %err, "run store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            EngineError::Internal(err) => {
                tracing::error!(error = %err, "internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
pub struct StartRunRequest {
    pub agent_id: String,
    /// `WEB` or `PHONE`.
    pub channel: String,
    pub phone_number: Option<String>,
}

#[derive(Deserialize)]
pub struct TurnRequest {
    pub utterance: String,
}

#[derive(Deserialize)]
pub struct EndRunRequest {
    /// Disposition label; defaults to `caller_hangup`.
    pub disposition: Option<String>,
}

#[derive(Deserialize)]
pub struct ListRunsParams {
    pub status: Option<String>,
    pub agent_id: Option<String>,
    pub owner_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct TurnResponse {
    pub text: String,
    /// Present when this turn finalised the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<Disposition>,
}

/// POST /api/runs
pub async fn start_run_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<Run>), ApiError> {
    let channel = Channel::from_str_label(&payload.channel).ok_or_else(|| {
        EngineError::InvalidInput(format!("unknown channel: {}", payload.channel))
    })?;

    let run = state
        .engine
        .start_run(&payload.agent_id, channel, payload.phone_number)
        .await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// GET /api/runs
pub async fn list_runs_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListRunsParams>,
) -> Result<Json<Vec<Run>>, ApiError> {
    let status = match params.status.as_deref() {
        Some(label) => Some(RunStatus::from_str_label(label).ok_or_else(|| {
            EngineError::InvalidInput(format!("unknown status: {label}"))
        })?),
        None => None,
    };

    let runs = state
        .engine
        .list_runs(RunFilter {
            status,
            agent_id: params.agent_id,
            owner_id: params.owner_id,
            limit: params.limit,
        })
        .await?;
    Ok(Json(runs))
}

/// GET /api/runs/{runId}
pub async fn get_run_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    let run = state.engine.get_run(&run_id).await?;
    Ok(Json(run))
}

/// GET /api/runs/{runId}/transcript
pub async fn get_transcript_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<TranscriptEntry>>, ApiError> {
    let entries = state.engine.transcript(&run_id).await?;
    Ok(Json(entries))
}

/// POST /api/runs/{runId}/turns
pub async fn process_turn_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(payload): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    let reply = state.engine.process_turn(&run_id, &payload.utterance).await?;
    Ok(Json(TurnResponse {
        text: reply.text,
        ended: reply.ended,
    }))
}

/// POST /api/runs/{runId}/end
///
/// Returns the final run snapshot together with its transcript.
pub async fn end_run_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(payload): Json<EndRunRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let disposition = match payload.disposition.as_deref() {
        Some(label) => Disposition::from_str_label(label).ok_or_else(|| {
            EngineError::InvalidInput(format!("unknown disposition: {label}"))
        })?,
        None => Disposition::CallerHangup,
    };

    let run = state.engine.end_run(&run_id, disposition).await?;
    let transcript = state.engine.transcript(&run_id).await?;
    Ok(Json(json!({ "run": run, "transcript": transcript })))
}

/// POST /api/runs/{runId}/fix
///
/// Manual counterpart of the recovery sweeper: forces one stuck run terminal.
pub async fn fix_run_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let recovered = state.engine.fix_run(&run_id).await?;
    let run = state.engine.get_run(&run_id).await?;
    Ok(Json(json!({ "recovered": recovered, "run": run })))
}
