//! Background task for recovering stale runs.

use std::sync::Arc;
use std::time::Duration;

use parley_engine::SessionEngine;
use tokio::time::sleep;

/// Starts a background task that periodically sweeps stale IN_PROGRESS runs.
///
/// This task runs indefinitely. A zero interval disables sweeping entirely;
/// stuck runs then hold their concurrency slots until fixed manually.
pub async fn start_sweep_task(engine: Arc<SessionEngine>, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::warn!("sweep interval is 0, stale-run recovery disabled");
        return;
    }
    if engine.settings().staleness_seconds == 0 {
        tracing::warn!("staleness threshold is 0, stale-run recovery disabled");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting stale-run recovery task");

    loop {
        // Sleep first so a restart loop cannot hammer the database.
        sleep(interval).await;

        match engine.sweep_stale_runs().await {
            Ok(report) => {
                if report.recovered > 0 {
                    tracing::info!(
                        examined = report.examined,
                        recovered = report.recovered,
                        "recovered stale runs"
                    );
                } else {
                    tracing::debug!(examined = report.examined, "no stale runs to recover");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "stale-run sweep failed");
            }
        }
    }
}
