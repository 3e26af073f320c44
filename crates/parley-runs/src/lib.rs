//! Run Store for the Parley platform.
//!
//! The durable record of every agent run: status, transcript, disposition,
//! timestamps, and token usage. This crate owns all SQL touching the `runs`,
//! `transcript_entries`, `agents`, and `run_slots` tables; the orchestration
//! engine reads and writes run state only through these helpers.
//!
//! # Concurrency discipline
//!
//! - Status never moves by blind overwrite. [`compare_and_set_status`] and
//!   [`finalize_run`] are UPDATEs guarded by the expected current status;
//!   the changed-row count decides who won a race. A duplicate terminal
//!   webhook and the recovery sweeper can both attempt to finalise the same
//!   run and exactly one succeeds.
//! - `run_number` and transcript `seq` are assigned inside the INSERT via
//!   `COALESCE(MAX(...), 0) + 1` subqueries, eliminating read-modify-write
//!   races on the counters.
//! - The per-owner slot counter in `run_slots` is mutated only by
//!   single-statement conditional UPDATEs ([`try_acquire_slot`] /
//!   [`release_slot`]); a failed acquire leaves no partial reservation.

mod agents;
mod error;
mod run;
mod slots;
mod store;

pub use agents::{get_agent, Agent};
pub use error::RunStoreError;
pub use run::{NewRunParams, Run, RunFilter, TranscriptEntry};
pub use slots::{in_flight, release_slot, try_acquire_slot};
pub use store::{
    add_token_usage, append_transcript_entry, attach_recording, compare_and_set_status,
    create_run, finalize_run, get_run, last_entries, list_runs, set_provider_call_id,
    stale_in_progress, transcript, turn_count,
};
