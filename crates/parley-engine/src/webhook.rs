//! Telephony webhook adapter.
//!
//! Translates provider callbacks into state-machine operations and always
//! produces valid response markup. The provider treats a non-2xx answer as a
//! delivery failure and retries, so nothing here is allowed to surface an
//! error: failed or stale events are logged and answered with a hangup or an
//! empty acknowledgement.

use parley_types::Disposition;

use crate::markup;
use crate::session::SessionEngine;
use crate::EngineError;

/// A decoded telephony callback for one run.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    /// The outbound call was answered; the agent should speak first.
    CallInitiated,
    /// The provider gathered a caller utterance.
    SpeechGathered { utterance: String },
    /// The provider reports a call status change.
    StatusChanged { provider_status: String },
    /// The call recording is available.
    RecordingReady { recording_url: String },
}

/// Markup handed back to the telephony provider.
#[derive(Debug, Clone, PartialEq)]
pub struct TelephonyReply {
    pub body: String,
}

impl TelephonyReply {
    pub const CONTENT_TYPE: &'static str = "text/xml";
}

/// Maps a provider call status to the disposition it implies, if any.
///
/// In-flight statuses (`queued`, `initiated`, `ringing`, `in-progress`) carry
/// no lifecycle consequence. Unrecognised statuses are treated the same way,
/// logged at warn.
pub(crate) fn map_provider_status(provider_status: &str) -> Option<Disposition> {
    match provider_status {
        "completed" => Some(Disposition::CallerHangup),
        "busy" => Some(Disposition::Busy),
        "no-answer" => Some(Disposition::NoAnswer),
        "failed" | "canceled" => Some(Disposition::ProviderError),
        "queued" | "initiated" | "ringing" | "in-progress" => None,
        other => {
            tracing::warn!(provider_status = other, "unrecognised call status ignored");
            None
        }
    }
}

impl SessionEngine {
    fn speech_action_url(&self, run_id: &str) -> String {
        format!(
            "{}/webhooks/calls/{}/speech",
            self.settings().callback_base_url.trim_end_matches('/'),
            run_id
        )
    }

    /// Handles one telephony callback. Infallible: every outcome, including
    /// stale events and engine failures, is answered with valid markup.
    pub async fn handle_webhook(&self, run_id: &str, event: WebhookEvent) -> TelephonyReply {
        let body = match event {
            WebhookEvent::CallInitiated => match self.greet(run_id).await {
                Ok(reply) => markup::say_and_gather(&reply.text, &self.speech_action_url(run_id)),
                Err(err) => {
                    tracing::warn!(run_id, error = %err, "call-initiated event dropped");
                    markup::hangup()
                }
            },
            WebhookEvent::SpeechGathered { utterance } => {
                match self.process_turn(run_id, &utterance).await {
                    Ok(reply) if reply.ended.is_some() => markup::say_and_hangup(&reply.text),
                    Ok(reply) => {
                        markup::say_and_gather(&reply.text, &self.speech_action_url(run_id))
                    }
                    Err(EngineError::InvalidInput(_)) => markup::say_and_gather(
                        "Sorry, I didn't catch that.",
                        &self.speech_action_url(run_id),
                    ),
                    Err(EngineError::Provider(err)) => {
                        tracing::error!(run_id, error = %err, "turn failed on provider error");
                        markup::say_and_hangup("Sorry, something went wrong. Goodbye.")
                    }
                    Err(err) => {
                        tracing::warn!(run_id, error = %err, "speech event dropped");
                        markup::hangup()
                    }
                }
            }
            WebhookEvent::StatusChanged { provider_status } => {
                if let Some(disposition) = map_provider_status(&provider_status) {
                    match self.end_run(run_id, disposition).await {
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(
                                run_id,
                                provider_status = %provider_status,
                                error = %err,
                                "status event dropped"
                            );
                        }
                    }
                }
                markup::empty()
            }
            WebhookEvent::RecordingReady { recording_url } => {
                let id = run_id.to_string();
                let result = self
                    .with_conn(move |conn| {
                        parley_runs::attach_recording(conn, &id, &recording_url)
                            .map_err(EngineError::from)
                    })
                    .await;
                if let Err(err) = result {
                    tracing::warn!(run_id, error = %err, "recording event dropped");
                }
                markup::empty()
            }
        };
        TelephonyReply { body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EngineSettings;
    use parley_db::DbRuntimeSettings;
    use parley_provider::{ProviderClient, ScriptedProvider};
    use parley_types::{Channel, RunStatus};
    use std::sync::Arc;

    fn engine(name: &str, provider: Arc<dyn ProviderClient>) -> SessionEngine {
        let uri = format!("file:{name}?mode=memory&cache=shared");
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 5_000,
            pool_max_size: 1,
        };
        let pool = parley_db::create_pool(&uri, settings)
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");
        parley_db::run_migrations(&conn).expect("migrations should succeed");
        conn.execute(
            "INSERT INTO agents (agent_id, owner_id, display_name, system_prompt, greeting, max_concurrent_runs)
             VALUES ('a1', 'o1', 'Bot', 'You are helpful.', 'Hi, you have reached support.', NULL)",
            [],
        )
        .expect("seed should succeed");
        SessionEngine::new(pool, provider, EngineSettings::default())
    }

    #[test]
    fn status_mapping_covers_the_provider_vocabulary() {
        assert_eq!(
            map_provider_status("completed"),
            Some(Disposition::CallerHangup)
        );
        assert_eq!(map_provider_status("busy"), Some(Disposition::Busy));
        assert_eq!(map_provider_status("no-answer"), Some(Disposition::NoAnswer));
        assert_eq!(
            map_provider_status("failed"),
            Some(Disposition::ProviderError)
        );
        assert_eq!(
            map_provider_status("canceled"),
            Some(Disposition::ProviderError)
        );
        assert_eq!(map_provider_status("ringing"), None);
        assert_eq!(map_provider_status("in-progress"), None);
        assert_eq!(map_provider_status("something-new"), None);
    }

    #[tokio::test]
    async fn call_initiated_speaks_the_greeting_and_gathers() {
        let engine = engine(
            "wh_initiated",
            Arc::new(ScriptedProvider::new()) as Arc<dyn ProviderClient>,
        );
        let run = engine
            .start_run("a1", Channel::Phone, Some("+15550100".to_string()))
            .await
            .expect("start should succeed");

        let reply = engine
            .handle_webhook(&run.run_id, WebhookEvent::CallInitiated)
            .await;
        assert!(reply.body.contains("Hi, you have reached support."));
        assert!(reply.body.contains("<Gather"));
        assert!(reply.body.contains(&format!("/webhooks/calls/{}/speech", run.run_id)));
    }

    #[tokio::test]
    async fn events_for_unknown_runs_still_get_markup() {
        let engine = engine(
            "wh_unknown",
            Arc::new(ScriptedProvider::new()) as Arc<dyn ProviderClient>,
        );
        let reply = engine
            .handle_webhook("ghost", WebhookEvent::CallInitiated)
            .await;
        assert!(reply.body.contains("<Hangup/>"));
    }

    #[tokio::test]
    async fn completed_status_finalises_as_caller_hangup() {
        let engine = engine(
            "wh_completed",
            Arc::new(ScriptedProvider::new()) as Arc<dyn ProviderClient>,
        );
        let run = engine
            .start_run("a1", Channel::Phone, Some("+15550100".to_string()))
            .await
            .expect("start should succeed");

        let reply = engine
            .handle_webhook(
                &run.run_id,
                WebhookEvent::StatusChanged {
                    provider_status: "completed".to_string(),
                },
            )
            .await;
        assert!(reply.body.ends_with("<Response/>"));

        let run = engine.get_run(&run.run_id).await.expect("run should exist");
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.disposition, Some(Disposition::CallerHangup));
    }

    #[tokio::test]
    async fn duplicate_terminal_status_is_acknowledged_without_rewrite() {
        let engine = engine(
            "wh_dup_terminal",
            Arc::new(ScriptedProvider::new()) as Arc<dyn ProviderClient>,
        );
        let run = engine
            .start_run("a1", Channel::Phone, Some("+15550100".to_string()))
            .await
            .expect("start should succeed");

        for status in ["completed", "failed"] {
            let reply = engine
                .handle_webhook(
                    &run.run_id,
                    WebhookEvent::StatusChanged {
                        provider_status: status.to_string(),
                    },
                )
                .await;
            assert!(reply.body.ends_with("<Response/>"));
        }

        // The first event won; the second changed nothing.
        let run = engine.get_run(&run.run_id).await.expect("run should exist");
        assert_eq!(run.disposition, Some(Disposition::CallerHangup));
    }

    #[tokio::test]
    async fn recording_ready_attaches_after_terminal() {
        let engine = engine(
            "wh_recording",
            Arc::new(ScriptedProvider::new()) as Arc<dyn ProviderClient>,
        );
        let run = engine
            .start_run("a1", Channel::Phone, Some("+15550100".to_string()))
            .await
            .expect("start should succeed");
        engine
            .end_run(&run.run_id, Disposition::CallerHangup)
            .await
            .expect("end should succeed");

        engine
            .handle_webhook(
                &run.run_id,
                WebhookEvent::RecordingReady {
                    recording_url: "https://recordings.example/r1.wav".to_string(),
                },
            )
            .await;

        let run = engine.get_run(&run.run_id).await.expect("run should exist");
        assert_eq!(
            run.recording_url.as_deref(),
            Some("https://recordings.example/r1.wav")
        );
    }

    #[tokio::test]
    async fn speech_after_hangup_is_answered_with_hangup() {
        let engine = engine(
            "wh_late_speech",
            Arc::new(ScriptedProvider::new()) as Arc<dyn ProviderClient>,
        );
        let run = engine
            .start_run("a1", Channel::Phone, Some("+15550100".to_string()))
            .await
            .expect("start should succeed");
        engine
            .end_run(&run.run_id, Disposition::CallerHangup)
            .await
            .expect("end should succeed");

        let reply = engine
            .handle_webhook(
                &run.run_id,
                WebhookEvent::SpeechGathered {
                    utterance: "are you still there?".to_string(),
                },
            )
            .await;
        assert!(reply.body.contains("<Hangup/>"));
    }
}
