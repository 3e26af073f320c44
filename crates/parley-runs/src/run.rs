//! Run record and transcript types, plus their row mappings.

use parley_types::{Channel, Disposition, RunStatus, Speaker};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// A single agent run: one conversational session, web or phone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    /// Internal database ID.
    pub id: i64,
    /// Opaque unique identifier (UUID), assigned at creation.
    pub run_id: String,
    /// Human-readable, channel-prefixed identifier (e.g. `WEB-000017`).
    pub run_number: String,
    /// The agent conducting this run.
    pub agent_id: String,
    /// The agent's owner, used for concurrency accounting.
    pub owner_id: String,
    /// Web or phone.
    pub channel: Channel,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Terminal outcome classification; absent until the terminal transition.
    pub disposition: Option<Disposition>,
    /// Dialed number; present only for the phone channel.
    pub phone_number: Option<String>,
    /// The telephony provider's call identifier, once dialed.
    pub provider_call_id: Option<String>,
    /// Recording reference attached by the recording-ready webhook.
    pub recording_url: Option<String>,
    /// Accumulated provider-reported token cost.
    pub token_usage: i64,
    /// Terminal timestamp minus start timestamp; absent until terminal.
    pub duration_seconds: Option<i64>,
    /// When the run entered IN_PROGRESS (ISO 8601).
    pub started_at: Option<String>,
    /// When the run reached a terminal status (ISO 8601).
    pub ended_at: Option<String>,
    /// Row creation timestamp (ISO 8601).
    pub created_at: String,
    /// Last activity timestamp; the staleness signal for the sweeper.
    pub updated_at: String,
}

impl Run {
    /// Maps a full `runs` row (in column order of [`RUN_COLUMNS`]).
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let channel_label: String = row.get(5)?;
        let status_label: String = row.get(6)?;
        let disposition_label: Option<String> = row.get(7)?;

        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            run_number: row.get(2)?,
            agent_id: row.get(3)?,
            owner_id: row.get(4)?,
            channel: Channel::from_str_label(&channel_label)
                .ok_or_else(|| corrupt(5, &channel_label))?,
            status: RunStatus::from_str_label(&status_label)
                .ok_or_else(|| corrupt(6, &status_label))?,
            disposition: disposition_label
                .as_deref()
                .map(|label| Disposition::from_str_label(label).ok_or_else(|| corrupt(7, label)))
                .transpose()?,
            phone_number: row.get(8)?,
            provider_call_id: row.get(9)?,
            recording_url: row.get(10)?,
            token_usage: row.get(11)?,
            duration_seconds: row.get(12)?,
            started_at: row.get(13)?,
            ended_at: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

fn corrupt(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unrecognised label: {value}").into(),
    )
}

/// Column list matching [`Run::from_row`]. Every run SELECT uses this.
pub(crate) const RUN_COLUMNS: &str = "id, run_id, run_number, agent_id, owner_id, channel, \
     status, disposition, phone_number, provider_call_id, recording_url, token_usage, \
     duration_seconds, started_at, ended_at, created_at, updated_at";

/// One turn fragment: a caller utterance or an agent response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    /// Position within the run's transcript (1-based).
    pub seq: i64,
    /// Who spoke.
    pub speaker: Speaker,
    /// What was said.
    pub text: String,
    /// When it was recorded (ISO 8601).
    pub spoken_at: String,
}

impl TranscriptEntry {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let speaker_label: String = row.get(1)?;
        Ok(Self {
            seq: row.get(0)?,
            speaker: Speaker::from_str_label(&speaker_label)
                .ok_or_else(|| corrupt(1, &speaker_label))?,
            text: row.get(2)?,
            spoken_at: row.get(3)?,
        })
    }
}

/// Parameters for creating a new run.
#[derive(Debug, Clone)]
pub struct NewRunParams {
    pub run_id: String,
    pub agent_id: String,
    pub owner_id: String,
    pub channel: Channel,
    pub phone_number: Option<String>,
}

/// Filter criteria for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Filter by lifecycle status.
    pub status: Option<RunStatus>,
    /// Filter by agent.
    pub agent_id: Option<String>,
    /// Filter by owner.
    pub owner_id: Option<String>,
    /// Maximum number of runs to return (default: 100).
    pub limit: Option<i64>,
}
