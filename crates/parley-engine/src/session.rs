//! The session state machine: StartRun, Greet, ProcessTurn, EndRun.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use parley_db::DbPool;
use parley_provider::{ConversationTurn, ProviderClient};
use parley_runs::{Agent, NewRunParams, Run, RunFilter, TranscriptEntry};
use parley_types::{Channel, Disposition, RunStatus, Speaker};
use uuid::Uuid;

use crate::error::EngineError;
use crate::gate::ConcurrencyGate;

/// Engine tuning knobs, loaded from configuration by the server.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Completed agent turns after which a run is force-finalised.
    pub max_turns: u32,
    /// Concurrency ceiling for owners whose agents set none.
    pub default_concurrency_ceiling: u32,
    /// Inactivity span after which an IN_PROGRESS run counts as stale.
    pub staleness_seconds: u64,
    /// Public base URL the telephony provider posts webhooks back to.
    pub callback_base_url: String,
    /// Control marker the language provider emits to end the session.
    pub end_call_marker: String,
    /// Control marker requesting a transfer to a human.
    pub transfer_marker: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_turns: 50,
            default_concurrency_ceiling: 5,
            staleness_seconds: 300,
            callback_base_url: "http://localhost:8080".to_string(),
            end_call_marker: "[[END_CALL]]".to_string(),
            transfer_marker: "[[TRANSFER]]".to_string(),
        }
    }
}

/// The agent's response to one caller turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    /// What the agent says, control markers stripped.
    pub text: String,
    /// Set when this turn finalised the run.
    pub ended: Option<Disposition>,
}

/// Drives runs through their lifecycle.
///
/// One instance serves the whole process; it is shared behind an `Arc` by
/// every request handler and the background sweeper.
pub struct SessionEngine {
    pool: DbPool,
    provider: Arc<dyn ProviderClient>,
    settings: EngineSettings,
    gate: ConcurrencyGate,
    /// Per-run turn serialisation. An entry exists only while its run is
    /// live; terminal paths remove it.
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionEngine {
    pub fn new(
        pool: DbPool,
        provider: Arc<dyn ProviderClient>,
        settings: EngineSettings,
    ) -> Self {
        let gate = ConcurrencyGate::new(pool.clone());
        Self {
            pool,
            provider,
            settings,
            gate,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Runs a closure against a pooled connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| EngineError::Internal(format!("db connection failed: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("task join error: {e}")))?
    }

    fn turn_lock(&self, run_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().expect("turn lock map poisoned");
        Arc::clone(locks.entry(run_id.to_string()).or_default())
    }

    fn drop_turn_lock(&self, run_id: &str) {
        let mut locks = self.turn_locks.lock().expect("turn lock map poisoned");
        locks.remove(run_id);
    }

    async fn load_agent(&self, agent_id: &str) -> Result<Agent, EngineError> {
        let id = agent_id.to_string();
        self.with_conn(move |conn| {
            parley_runs::get_agent(conn, &id)?
                .ok_or_else(|| EngineError::NotFound(format!("agent {id}")))
        })
        .await
    }

    fn ceiling_for(&self, agent: &Agent) -> u32 {
        agent
            .max_concurrent_runs
            .unwrap_or(self.settings.default_concurrency_ceiling)
    }

    /// Creates and admits a new run.
    ///
    /// The owner's slot is claimed before any row is written, so a rejected
    /// request leaves no trace. Web runs go straight to IN_PROGRESS; phone
    /// runs additionally dial out, and a failed dial finalises the run as a
    /// provider error on the spot.
    pub async fn start_run(
        &self,
        agent_id: &str,
        channel: Channel,
        phone_number: Option<String>,
    ) -> Result<Run, EngineError> {
        if channel == Channel::Phone && phone_number.as_deref().unwrap_or("").is_empty() {
            return Err(EngineError::InvalidInput(
                "phone runs require a phone number".to_string(),
            ));
        }

        let agent = self.load_agent(agent_id).await?;
        let ceiling = self.ceiling_for(&agent);

        if !self.gate.try_acquire(&agent.owner_id, ceiling).await? {
            tracing::info!(
                owner_id = %agent.owner_id,
                ceiling,
                "run rejected at concurrency ceiling"
            );
            return Err(EngineError::ConcurrencyExceeded {
                owner_id: agent.owner_id,
            });
        }

        let params = NewRunParams {
            run_id: Uuid::new_v4().to_string(),
            agent_id: agent.agent_id.clone(),
            owner_id: agent.owner_id.clone(),
            channel,
            phone_number: phone_number.clone(),
        };
        let created = self
            .with_conn(move |conn| {
                let run = parley_runs::create_run(conn, &params)?;
                parley_runs::compare_and_set_status(
                    conn,
                    &run.run_id,
                    RunStatus::Pending,
                    RunStatus::InProgress,
                )?;
                parley_runs::get_run(conn, &run.run_id).map_err(EngineError::from)
            })
            .await;

        let run = match created {
            Ok(run) => run,
            Err(err) => {
                // The slot was claimed but no run materialised; give it back.
                self.gate.release(&agent.owner_id).await?;
                return Err(err);
            }
        };

        if channel == Channel::Phone {
            let number = phone_number.unwrap_or_default();
            let callback = format!(
                "{}/webhooks/calls/{}",
                self.settings.callback_base_url.trim_end_matches('/'),
                run.run_id
            );
            match self.provider.dial(&number, &callback).await {
                Ok(call_id) => {
                    let run_id = run.run_id.clone();
                    self.with_conn(move |conn| {
                        parley_runs::set_provider_call_id(conn, &run_id, &call_id)
                            .map_err(EngineError::from)
                    })
                    .await?;
                }
                Err(err) => {
                    tracing::error!(run_id = %run.run_id, error = %err, "outbound dial failed");
                    self.finalize_and_release(&run.run_id, Disposition::ProviderError)
                        .await?;
                    return Err(EngineError::Provider(err));
                }
            }
        }

        tracing::info!(
            run_id = %run.run_id,
            run_number = %run.run_number,
            channel = %channel,
            "run started"
        );
        self.get_run(&run.run_id).await
    }

    /// Produces the agent's opening line.
    ///
    /// Idempotent: if the run already has transcript entries (a duplicate
    /// call-initiated event), the recorded opening line is returned again
    /// without a second generation.
    pub async fn greet(&self, run_id: &str) -> Result<TurnReply, EngineError> {
        let lock = self.turn_lock(run_id);
        let _guard = lock.lock().await;

        let run = self.get_run(run_id).await?;
        if run.status != RunStatus::InProgress {
            return Err(EngineError::InvalidState {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        let id = run_id.to_string();
        let existing = self
            .with_conn(move |conn| parley_runs::transcript(conn, &id).map_err(EngineError::from))
            .await?;
        if let Some(first) = existing.into_iter().next() {
            return Ok(TurnReply {
                text: first.text,
                ended: None,
            });
        }

        let agent = self.load_agent(&run.agent_id).await?;
        let text = if agent.greeting.trim().is_empty() {
            let reply = self.provider.generate(&agent.system_prompt, &[]).await?;
            let id = run_id.to_string();
            let cost = reply.token_cost;
            self.with_conn(move |conn| {
                parley_runs::add_token_usage(conn, &id, cost).map_err(EngineError::from)
            })
            .await?;
            reply.text
        } else {
            agent.greeting
        };

        let id = run_id.to_string();
        let spoken = text.clone();
        let recorded = self
            .with_conn(move |conn| {
                parley_runs::append_transcript_entry(conn, &id, Speaker::Agent, &spoken)
                    .map_err(EngineError::from)
            })
            .await?;
        if recorded.is_none() {
            return Err(EngineError::StaleEvent {
                run_id: run_id.to_string(),
                reason: "run finalised before the opening line was recorded".to_string(),
            });
        }

        Ok(TurnReply { text, ended: None })
    }

    /// Processes one caller utterance and returns the agent's reply.
    ///
    /// Turns within a run are serialised by the per-run lock, held across
    /// the provider await. A redelivered phone utterance (webhook retry) is
    /// answered with the already-recorded reply instead of a second turn.
    /// A run finalised while the provider call was in flight discards the
    /// reply and fails the turn as a stale event.
    pub async fn process_turn(
        &self,
        run_id: &str,
        utterance: &str,
    ) -> Result<TurnReply, EngineError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(EngineError::InvalidInput(
                "utterance must not be empty".to_string(),
            ));
        }

        let lock = self.turn_lock(run_id);
        let _guard = lock.lock().await;

        let run = self.get_run(run_id).await?;
        if run.status != RunStatus::InProgress {
            return Err(EngineError::InvalidState {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        // Duplicate delivery: the previous invocation already recorded this
        // exact utterance and the agent's answer to it. Only phone turns
        // arrive over an at-least-once webhook channel; a web caller who
        // types the same phrase twice means it as two turns.
        if run.channel == Channel::Phone {
            let id = run_id.to_string();
            let recent = self
                .with_conn(move |conn| {
                    parley_runs::last_entries(conn, &id, 2).map_err(EngineError::from)
                })
                .await?;
            if recent.len() == 2
                && recent[0].speaker == Speaker::Agent
                && recent[1].speaker == Speaker::Caller
                && recent[1].text == utterance
            {
                tracing::debug!(run_id, "duplicate utterance, replaying recorded reply");
                return Ok(TurnReply {
                    text: recent[0].text.clone(),
                    ended: None,
                });
            }
        }

        let agent = self.load_agent(&run.agent_id).await?;

        let id = run_id.to_string();
        let said = utterance.to_string();
        let context = self
            .with_conn(move |conn| {
                if parley_runs::append_transcript_entry(conn, &id, Speaker::Caller, &said)?
                    .is_none()
                {
                    return Err(EngineError::StaleEvent {
                        run_id: id.clone(),
                        reason: "run finalised before the utterance was recorded".to_string(),
                    });
                }
                parley_runs::transcript(conn, &id).map_err(EngineError::from)
            })
            .await?;
        let turns: Vec<ConversationTurn> = context
            .into_iter()
            .map(|entry| ConversationTurn {
                speaker: entry.speaker,
                text: entry.text,
            })
            .collect();

        let reply = match self.provider.generate(&agent.system_prompt, &turns).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(run_id, error = %err, "generation failed, finalising run");
                self.finalize_and_release(run_id, Disposition::ProviderError)
                    .await?;
                return Err(EngineError::Provider(err));
            }
        };

        let (text, mut disposition) = self.strip_control_markers(&reply.text);

        // The run may have been hung up or swept while the provider call was
        // in flight. The status-guarded append decides: a terminal run takes
        // neither the reply nor its token cost, and the turn is rejected.
        let id = run_id.to_string();
        let spoken = text.clone();
        let cost = reply.token_cost;
        let agent_turns = self
            .with_conn(move |conn| {
                if parley_runs::append_transcript_entry(conn, &id, Speaker::Agent, &spoken)?
                    .is_none()
                {
                    return Ok(None);
                }
                parley_runs::add_token_usage(conn, &id, cost)?;
                parley_runs::turn_count(conn, &id, Speaker::Agent)
                    .map(Some)
                    .map_err(EngineError::from)
            })
            .await?;
        let agent_turns = match agent_turns {
            Some(count) => count,
            None => {
                tracing::info!(run_id, "run finalised mid-turn, reply discarded");
                return Err(EngineError::StaleEvent {
                    run_id: run_id.to_string(),
                    reason: "run finalised while the reply was being generated".to_string(),
                });
            }
        };

        if disposition.is_none() && agent_turns >= i64::from(self.settings.max_turns) {
            tracing::info!(run_id, turns = agent_turns, "turn ceiling reached");
            disposition = Some(Disposition::MaxTurnsReached);
        }

        if let Some(d) = disposition {
            self.finalize_and_release(run_id, d).await?;
            return Ok(TurnReply {
                text,
                ended: Some(d),
            });
        }

        Ok(TurnReply { text, ended: None })
    }

    /// Finalises a run with the given disposition.
    ///
    /// Idempotent against duplicates and races: a run that is already
    /// terminal is returned unchanged, and losing the finalise race to the
    /// sweeper or a concurrent event is not an error.
    pub async fn end_run(&self, run_id: &str, disposition: Disposition) -> Result<Run, EngineError> {
        let run = self.get_run(run_id).await?;
        match run.status {
            RunStatus::Completed | RunStatus::Failed => return Ok(run),
            RunStatus::Pending => {
                return Err(EngineError::InvalidState {
                    run_id: run_id.to_string(),
                    status: run.status,
                });
            }
            RunStatus::InProgress => {}
        }

        let won = self.try_finalize(run_id, disposition).await?;
        if won {
            self.gate.release(&run.owner_id).await?;
            self.drop_turn_lock(run_id);
            tracing::info!(run_id, disposition = %disposition, "run finalised");
        }
        self.get_run(run_id).await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run, EngineError> {
        let id = run_id.to_string();
        self.with_conn(move |conn| parley_runs::get_run(conn, &id).map_err(EngineError::from))
            .await
    }

    pub async fn transcript(&self, run_id: &str) -> Result<Vec<TranscriptEntry>, EngineError> {
        let id = run_id.to_string();
        self.with_conn(move |conn| {
            // Surface NotFound for unknown runs instead of an empty list.
            parley_runs::get_run(conn, &id)?;
            parley_runs::transcript(conn, &id).map_err(EngineError::from)
        })
        .await
    }

    pub async fn list_runs(&self, filter: RunFilter) -> Result<Vec<Run>, EngineError> {
        self.with_conn(move |conn| {
            parley_runs::list_runs(conn, &filter).map_err(EngineError::from)
        })
        .await
    }

    /// CAS-finalises; returns whether this caller won.
    pub(crate) async fn try_finalize(
        &self,
        run_id: &str,
        disposition: Disposition,
    ) -> Result<bool, EngineError> {
        let id = run_id.to_string();
        self.with_conn(move |conn| {
            parley_runs::finalize_run(conn, &id, RunStatus::InProgress, disposition)
                .map_err(EngineError::from)
        })
        .await
    }

    /// Terminal-path helper: finalise, and release the owner's slot only if
    /// this caller won the finalise race (the winner releases exactly once).
    /// The winner also retires the run's turn-lock entry.
    pub(crate) async fn finalize_and_release(
        &self,
        run_id: &str,
        disposition: Disposition,
    ) -> Result<bool, EngineError> {
        let run = self.get_run(run_id).await?;
        let won = self.try_finalize(run_id, disposition).await?;
        if won {
            self.gate.release(&run.owner_id).await?;
            self.drop_turn_lock(run_id);
            tracing::info!(run_id, disposition = %disposition, "run finalised");
        }
        Ok(won)
    }

    /// Splits control markers off a generated reply and maps them to a
    /// disposition. Markers may appear anywhere in the text; the spoken
    /// portion is everything else, trimmed.
    fn strip_control_markers(&self, raw: &str) -> (String, Option<Disposition>) {
        let mut text = raw.to_string();
        let mut disposition = None;

        if text.contains(self.settings.end_call_marker.as_str()) {
            text = text.replace(self.settings.end_call_marker.as_str(), "");
            disposition = Some(Disposition::Completed);
        }
        if text.contains(self.settings.transfer_marker.as_str()) {
            text = text.replace(self.settings.transfer_marker.as_str(), "");
            disposition = Some(Disposition::TransferRequested);
        }

        (text.trim().to_string(), disposition)
    }
}
