//! Telephony webhook handlers.
//!
//! The telephony provider retries any delivery that does not get a 2xx, so
//! these handlers always answer `200 OK` with response markup. Lifecycle
//! consequences (including dropped stale events) are decided inside the
//! engine's webhook adapter.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::header,
    response::{IntoResponse, Response},
    Form,
};
use parley_engine::{TelephonyReply, WebhookEvent};
use serde::Deserialize;

use crate::AppState;

fn markup_response(reply: TelephonyReply) -> Response {
    (
        [(header::CONTENT_TYPE, TelephonyReply::CONTENT_TYPE)],
        reply.body,
    )
        .into_response()
}

#[derive(Deserialize, Default)]
pub struct SpeechForm {
    /// The provider's transcription of the gathered speech.
    #[serde(rename = "SpeechResult", default)]
    pub speech_result: String,
}

#[derive(Deserialize, Default)]
pub struct StatusForm {
    #[serde(rename = "CallStatus", default)]
    pub call_status: String,
}

#[derive(Deserialize, Default)]
pub struct RecordingForm {
    #[serde(rename = "RecordingUrl", default)]
    pub recording_url: String,
}

/// POST /webhooks/calls/{runId}/initiated
pub async fn call_initiated_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Response {
    let reply = state
        .engine
        .handle_webhook(&run_id, WebhookEvent::CallInitiated)
        .await;
    markup_response(reply)
}

/// POST /webhooks/calls/{runId}/speech
pub async fn speech_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
    Form(form): Form<SpeechForm>,
) -> Response {
    let reply = state
        .engine
        .handle_webhook(
            &run_id,
            WebhookEvent::SpeechGathered {
                utterance: form.speech_result,
            },
        )
        .await;
    markup_response(reply)
}

/// POST /webhooks/calls/{runId}/status
pub async fn status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
    Form(form): Form<StatusForm>,
) -> Response {
    let reply = state
        .engine
        .handle_webhook(
            &run_id,
            WebhookEvent::StatusChanged {
                provider_status: form.call_status,
            },
        )
        .await;
    markup_response(reply)
}

/// POST /webhooks/calls/{runId}/recording
pub async fn recording_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<String>,
    Form(form): Form<RecordingForm>,
) -> Response {
    let reply = state
        .engine
        .handle_webhook(
            &run_id,
            WebhookEvent::RecordingReady {
                recording_url: form.recording_url,
            },
        )
        .await;
    markup_response(reply)
}
