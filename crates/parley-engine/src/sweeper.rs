//! Recovery sweeper for abandoned runs.
//!
//! A run whose caller vanished mid-conversation (closed tab, dead webhook)
//! stays IN_PROGRESS and holds one of its owner's concurrency slots forever.
//! The sweeper finds IN_PROGRESS runs with no activity past the staleness
//! threshold and forces them terminal with the `stuck_recovered` disposition,
//! returning the slot. It finalises through the same compare-and-set as every
//! other terminal path, so racing a late genuine event is safe: exactly one
//! side wins.

use parley_types::{Disposition, RunStatus};

use crate::error::EngineError;
use crate::session::SessionEngine;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale candidates found.
    pub examined: usize,
    /// Runs this pass actually forced terminal.
    pub recovered: usize,
}

impl SessionEngine {
    /// Scans for stale IN_PROGRESS runs and recovers each.
    pub async fn sweep_stale_runs(&self) -> Result<SweepReport, EngineError> {
        let threshold = self.settings().staleness_seconds;
        let ids = self
            .with_conn(move |conn| {
                parley_runs::stale_in_progress(conn, threshold).map_err(EngineError::from)
            })
            .await?;

        let examined = ids.len();
        let mut recovered = 0usize;
        for run_id in ids {
            match self.fix_run(&run_id).await {
                Ok(true) => {
                    tracing::warn!(run_id, "stale run recovered");
                    recovered += 1;
                }
                Ok(false) => {
                    // Lost the race to a genuine terminal event. Fine.
                    tracing::debug!(run_id, "stale run already finalised");
                }
                Err(err) => {
                    tracing::error!(run_id, error = %err, "stale run recovery failed");
                }
            }
        }

        Ok(SweepReport {
            examined,
            recovered,
        })
    }

    /// Forces one run terminal with `stuck_recovered`.
    ///
    /// Also serves the manual repair endpoint. A run that is already terminal
    /// is left untouched; a PENDING run is promoted first so the standard
    /// finalise guard applies. Returns whether this call did the recovery.
    pub async fn fix_run(&self, run_id: &str) -> Result<bool, EngineError> {
        let run = self.get_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        if run.status == RunStatus::Pending {
            let id = run_id.to_string();
            self.with_conn(move |conn| {
                parley_runs::compare_and_set_status(
                    conn,
                    &id,
                    RunStatus::Pending,
                    RunStatus::InProgress,
                )
                .map_err(EngineError::from)
            })
            .await?;
        }
        self.finalize_and_release(run_id, Disposition::StuckRecovered)
            .await
    }
}
