//! Persistence operations for runs and transcripts.
//!
//! All status writes are compare-and-set: an UPDATE guarded by the expected
//! current status whose changed-row count decides success. Counters
//! (`run_number` sequence, transcript `seq`) are assigned inside the INSERT
//! with `COALESCE(MAX(...), 0) + 1` subqueries so two concurrent writers
//! cannot observe the same maximum.

use parley_types::{Disposition, RunStatus, Speaker};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::RunStoreError;
use crate::run::{NewRunParams, Run, RunFilter, TranscriptEntry, RUN_COLUMNS};

/// Creates a new run in PENDING with an atomically assigned run number.
///
/// The run number is channel-prefixed and zero-padded (`WEB-000017`); its
/// sequence component is computed inside the INSERT from the current maximum,
/// in the same statement that claims it.
///
/// # Errors
///
/// Returns `RunStoreError::Database` on SQL failure (including a duplicate
/// `run_id`).
pub fn create_run(conn: &Connection, new: &NewRunParams) -> Result<Run, RunStoreError> {
    let sql = format!(
        "INSERT INTO runs (run_id, run_number, seq, agent_id, owner_id, channel, status, phone_number)
         VALUES (
            ?1,
            printf('%s-%06d', ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM runs)),
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM runs),
            ?3, ?4, ?5, 'PENDING', ?6
         )
         RETURNING {RUN_COLUMNS}"
    );

    let run = conn.query_row(
        &sql,
        params![
            new.run_id,
            new.channel.run_number_prefix(),
            new.agent_id,
            new.owner_id,
            new.channel.as_str(),
            new.phone_number,
        ],
        |row| Run::from_row(row),
    )?;

    Ok(run)
}

/// Retrieves a run by its public ID.
///
/// # Errors
///
/// Returns `RunStoreError::NotFound` if no such run exists.
pub fn get_run(conn: &Connection, run_id: &str) -> Result<Run, RunStoreError> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1");
    conn.query_row(&sql, [run_id], |row| Run::from_row(row))
        .optional()?
        .ok_or_else(|| RunStoreError::NotFound(run_id.to_string()))
}

/// Advances a run's status if and only if it currently holds `expected`.
///
/// Returns `true` if this caller won the transition. When moving into
/// IN_PROGRESS the start timestamp is stamped.
pub fn compare_and_set_status(
    conn: &Connection,
    run_id: &str,
    expected: RunStatus,
    next: RunStatus,
) -> Result<bool, RunStoreError> {
    let changed = conn.execute(
        "UPDATE runs
         SET status = ?3,
             started_at = CASE WHEN ?3 = 'IN_PROGRESS' THEN datetime('now') ELSE started_at END,
             updated_at = datetime('now')
         WHERE run_id = ?1 AND status = ?2",
        params![run_id, expected.as_str(), next.as_str()],
    )?;
    Ok(changed == 1)
}

/// Finalises a run: terminal status, write-once disposition, duration.
///
/// The guard requires both the expected current status and a NULL
/// disposition, so a duplicate terminal webhook and the recovery sweeper
/// cannot both finalise the same run — exactly one caller sees `true`.
///
/// `duration_seconds` is computed in the statement as the wall-clock span
/// since `started_at` (floored at zero; runs that never started record 0).
pub fn finalize_run(
    conn: &Connection,
    run_id: &str,
    expected: RunStatus,
    disposition: Disposition,
) -> Result<bool, RunStoreError> {
    let changed = conn.execute(
        "UPDATE runs
         SET status = ?3,
             disposition = ?4,
             ended_at = datetime('now'),
             duration_seconds = MAX(
                 0,
                 CAST(strftime('%s', 'now') AS INTEGER)
                     - CAST(strftime('%s', COALESCE(started_at, datetime('now'))) AS INTEGER)
             ),
             updated_at = datetime('now')
         WHERE run_id = ?1 AND status = ?2 AND disposition IS NULL",
        params![
            run_id,
            expected.as_str(),
            disposition.terminal_status().as_str(),
            disposition.as_str(),
        ],
    )?;
    Ok(changed == 1)
}

/// Appends a transcript entry and bumps the run's activity timestamp.
///
/// The per-run `seq` is claimed inside the INSERT; entries are immutable
/// once written. The insert is guarded by the run's status in the same
/// statement: a run that is no longer IN_PROGRESS takes no entry, and the
/// caller gets `None` back. This is how a turn that was still awaiting the
/// language provider when the run was finalised gets discarded instead of
/// writing into a terminal transcript.
pub fn append_transcript_entry(
    conn: &Connection,
    run_id: &str,
    speaker: Speaker,
    text: &str,
) -> Result<Option<TranscriptEntry>, RunStoreError> {
    let entry = conn
        .query_row(
            "INSERT INTO transcript_entries (run_id, seq, speaker, text)
             SELECT
                ?1,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM transcript_entries WHERE run_id = ?1),
                ?2,
                ?3
             WHERE EXISTS (SELECT 1 FROM runs WHERE run_id = ?1 AND status = 'IN_PROGRESS')
             RETURNING seq, speaker, text, spoken_at",
            params![run_id, speaker.as_str(), text],
            |row| TranscriptEntry::from_row(row),
        )
        .optional()?;

    if entry.is_some() {
        conn.execute(
            "UPDATE runs SET updated_at = datetime('now') WHERE run_id = ?1",
            [run_id],
        )?;
    }

    Ok(entry)
}

/// Returns the full transcript in turn order.
pub fn transcript(conn: &Connection, run_id: &str) -> Result<Vec<TranscriptEntry>, RunStoreError> {
    let mut stmt = conn.prepare(
        "SELECT seq, speaker, text, spoken_at
         FROM transcript_entries
         WHERE run_id = ?1
         ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map([run_id], |row| TranscriptEntry::from_row(row))?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Returns the last `n` transcript entries, most recent first.
///
/// Used by the duplicate-delivery check: if an incoming utterance equals the
/// last CALLER entry and an AGENT entry follows it, the turn already ran.
pub fn last_entries(
    conn: &Connection,
    run_id: &str,
    n: i64,
) -> Result<Vec<TranscriptEntry>, RunStoreError> {
    let mut stmt = conn.prepare(
        "SELECT seq, speaker, text, spoken_at
         FROM transcript_entries
         WHERE run_id = ?1
         ORDER BY seq DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![run_id, n], |row| TranscriptEntry::from_row(row))?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Counts entries from one speaker — agent entries count completed turns.
pub fn turn_count(conn: &Connection, run_id: &str, speaker: Speaker) -> Result<i64, RunStoreError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM transcript_entries WHERE run_id = ?1 AND speaker = ?2",
        params![run_id, speaker.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Adds a provider-reported token cost to the run's accumulated usage.
///
/// Guarded by status like the transcript append: usage from a generation
/// that completed after the run went terminal is dropped.
pub fn add_token_usage(conn: &Connection, run_id: &str, cost: i64) -> Result<(), RunStoreError> {
    conn.execute(
        "UPDATE runs
         SET token_usage = token_usage + ?2, updated_at = datetime('now')
         WHERE run_id = ?1 AND status = 'IN_PROGRESS'",
        params![run_id, cost],
    )?;
    Ok(())
}

/// Records the telephony provider's call ID after a successful dial.
pub fn set_provider_call_id(
    conn: &Connection,
    run_id: &str,
    call_id: &str,
) -> Result<(), RunStoreError> {
    conn.execute(
        "UPDATE runs
         SET provider_call_id = ?2, updated_at = datetime('now')
         WHERE run_id = ?1",
        params![run_id, call_id],
    )?;
    Ok(())
}

/// Attaches a recording reference to a run.
///
/// Deliberately not guarded by status: the recording-ready webhook routinely
/// arrives after the run is terminal, and must still land.
pub fn attach_recording(conn: &Connection, run_id: &str, url: &str) -> Result<(), RunStoreError> {
    let changed = conn.execute(
        "UPDATE runs SET recording_url = ?2 WHERE run_id = ?1",
        params![run_id, url],
    )?;
    if changed == 0 {
        return Err(RunStoreError::NotFound(run_id.to_string()));
    }
    Ok(())
}

/// Returns the IDs of IN_PROGRESS runs with no activity for longer than
/// `older_than_seconds` — candidates for forced recovery.
pub fn stale_in_progress(
    conn: &Connection,
    older_than_seconds: u64,
) -> Result<Vec<String>, RunStoreError> {
    let mut stmt = conn.prepare(
        "SELECT run_id FROM runs
         WHERE status = 'IN_PROGRESS'
           AND updated_at < datetime('now', '-' || ?1 || ' seconds')
         ORDER BY updated_at ASC",
    )?;
    let rows = stmt.query_map([older_than_seconds], |row| row.get(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Lists runs matching the filter, most recent first.
pub fn list_runs(conn: &Connection, filter: &RunFilter) -> Result<Vec<Run>, RunStoreError> {
    // Build a parameterised query dynamically. WHERE clauses and bind
    // parameters are collected separately so nothing is interpolated.
    let mut clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut idx = 1u32;

    if let Some(status) = filter.status {
        clauses.push(format!("status = ?{idx}"));
        param_values.push(Box::new(status.as_str().to_string()));
        idx += 1;
    }

    if let Some(ref agent_id) = filter.agent_id {
        clauses.push(format!("agent_id = ?{idx}"));
        param_values.push(Box::new(agent_id.clone()));
        idx += 1;
    }

    if let Some(ref owner_id) = filter.owner_id {
        clauses.push(format!("owner_id = ?{idx}"));
        param_values.push(Box::new(owner_id.clone()));
        idx += 1;
    }

    let limit = filter.limit.unwrap_or(100);
    let where_clause = if clauses.is_empty() {
        String::from("1=1")
    } else {
        clauses.join(" AND ")
    };
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM runs
         WHERE {where_clause}
         ORDER BY seq DESC
         LIMIT ?{idx}"
    );

    param_values.push(Box::new(limit));

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| &**p).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| Run::from_row(row))?;

    let mut runs = Vec::new();
    for row in rows {
        runs.push(row?);
    }
    Ok(runs)
}
