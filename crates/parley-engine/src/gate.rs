//! Per-owner admission control.
//!
//! Enforces "at most N concurrently IN_PROGRESS runs per owner". The counter
//! lives in the run store's `run_slots` table and is mutated only by atomic
//! conditional UPDATEs, so concurrent acquires from several request handlers
//! (or several server instances sharing the database) cannot over-admit, and
//! a failed acquire leaves no partial reservation.

use parley_db::DbPool;

use crate::error::EngineError;

/// Handle to the per-owner slot counters.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    pool: DbPool,
}

impl ConcurrencyGate {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Attempts to claim one slot for `owner_id` under `ceiling`.
    ///
    /// Returns `false` when the owner is at their ceiling.
    pub async fn try_acquire(&self, owner_id: &str, ceiling: u32) -> Result<bool, EngineError> {
        let pool = self.pool.clone();
        let owner = owner_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| EngineError::Internal(format!("db connection failed: {e}")))?;
            parley_runs::try_acquire_slot(&conn, &owner, ceiling).map_err(EngineError::from)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("task join error: {e}")))?
    }

    /// Returns one slot for `owner_id`. Releasing below zero is harmless.
    pub async fn release(&self, owner_id: &str) -> Result<(), EngineError> {
        let pool = self.pool.clone();
        let owner = owner_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| EngineError::Internal(format!("db connection failed: {e}")))?;
            parley_runs::release_slot(&conn, &owner).map_err(EngineError::from)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("task join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_db::DbRuntimeSettings;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn shared_pool(name: &str) -> DbPool {
        let uri = format!("file:{name}?mode=memory&cache=shared");
        // One pooled connection: contending tasks queue on the pool instead
        // of hitting shared-cache table locks.
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 5_000,
            pool_max_size: 1,
        };
        let pool = parley_db::create_pool(&uri, settings)
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");
        parley_db::run_migrations(&conn).expect("migrations should succeed");
        pool
    }

    #[tokio::test]
    async fn concurrent_acquires_never_exceed_ceiling() {
        let gate = Arc::new(ConcurrencyGate::new(shared_pool("gate_concurrent")));
        let ceiling = 4u32;
        let granted = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let gate = Arc::clone(&gate);
            let granted = Arc::clone(&granted);
            handles.push(tokio::spawn(async move {
                if gate
                    .try_acquire("owner-1", ceiling)
                    .await
                    .expect("acquire should not error")
                {
                    granted.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }

        assert_eq!(
            granted.load(Ordering::Relaxed),
            ceiling,
            "32 contended acquires grant exactly the ceiling"
        );
    }

    #[tokio::test]
    async fn release_under_contention_keeps_counter_sane() {
        let gate = Arc::new(ConcurrencyGate::new(shared_pool("gate_release")));

        // Fill, then release and re-acquire from many tasks.
        for _ in 0..2 {
            assert!(gate
                .try_acquire("owner-1", 2)
                .await
                .expect("acquire should succeed"));
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                gate.release("owner-1").await.expect("release should not error");
                let _ = gate
                    .try_acquire("owner-1", 2)
                    .await
                    .expect("acquire should not error");
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }

        // However the interleaving lands, the counter must stay in bounds.
        let pool = shared_pool("gate_release");
        let conn = pool.get().expect("should get a connection");
        let in_flight = parley_runs::in_flight(&conn, "owner-1").expect("count should succeed");
        assert!((0..=2).contains(&in_flight), "in_flight out of bounds: {in_flight}");
    }
}
