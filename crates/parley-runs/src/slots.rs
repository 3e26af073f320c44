//! Per-owner concurrency slot counters.
//!
//! The counter lives in the store rather than in process memory so that the
//! admission decision survives restarts and stays correct when several
//! request handlers race. Each mutation is a single conditional UPDATE —
//! there is no acquire-then-check window and a failed acquire leaves no
//! partial reservation.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::RunStoreError;

/// Attempts to claim one in-flight slot for `owner_id` under `ceiling`.
///
/// Returns `true` if the slot was claimed. The owner row is created on first
/// contact; the ceiling is refreshed on every call so configuration changes
/// take effect without a restart.
pub fn try_acquire_slot(
    conn: &Connection,
    owner_id: &str,
    ceiling: u32,
) -> Result<bool, RunStoreError> {
    conn.execute(
        "INSERT INTO run_slots (owner_id, in_flight, ceiling) VALUES (?1, 0, ?2)
         ON CONFLICT(owner_id) DO UPDATE SET ceiling = excluded.ceiling",
        params![owner_id, ceiling],
    )?;

    let changed = conn.execute(
        "UPDATE run_slots
         SET in_flight = in_flight + 1
         WHERE owner_id = ?1 AND in_flight < ceiling",
        [owner_id],
    )?;
    Ok(changed == 1)
}

/// Returns one slot for `owner_id`, flooring at zero.
///
/// The floor guards against double-release (a duplicate terminal event
/// arriving after the sweeper already released the slot).
pub fn release_slot(conn: &Connection, owner_id: &str) -> Result<(), RunStoreError> {
    conn.execute(
        "UPDATE run_slots
         SET in_flight = CASE WHEN in_flight > 0 THEN in_flight - 1 ELSE 0 END
         WHERE owner_id = ?1",
        [owner_id],
    )?;
    Ok(())
}

/// Current in-flight count for an owner (0 if the owner has no row).
pub fn in_flight(conn: &Connection, owner_id: &str) -> Result<i64, RunStoreError> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT in_flight FROM run_slots WHERE owner_id = ?1",
            [owner_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        parley_db::run_migrations(&conn).expect("migrations should succeed");
        conn
    }

    #[test]
    fn acquire_succeeds_exactly_ceiling_times() {
        let conn = test_conn();
        let ceiling = 3u32;

        let mut granted = 0;
        for _ in 0..=ceiling {
            if try_acquire_slot(&conn, "o1", ceiling).expect("acquire should not error") {
                granted += 1;
            }
        }
        assert_eq!(granted, ceiling, "N+1 attempts grant exactly N slots");
        assert_eq!(in_flight(&conn, "o1").expect("count should succeed"), 3);
    }

    #[test]
    fn release_frees_a_slot() {
        let conn = test_conn();

        assert!(try_acquire_slot(&conn, "o1", 1).expect("acquire should succeed"));
        assert!(!try_acquire_slot(&conn, "o1", 1).expect("acquire should not error"));

        release_slot(&conn, "o1").expect("release should succeed");
        assert!(try_acquire_slot(&conn, "o1", 1).expect("slot should be free again"));
    }

    #[test]
    fn release_floors_at_zero() {
        let conn = test_conn();

        release_slot(&conn, "o1").expect("release of unknown owner is harmless");
        assert!(try_acquire_slot(&conn, "o1", 1).expect("acquire should succeed"));
        release_slot(&conn, "o1").expect("release should succeed");
        release_slot(&conn, "o1").expect("double release should not error");
        assert_eq!(in_flight(&conn, "o1").expect("count should succeed"), 0);
    }

    #[test]
    fn owners_are_independent() {
        let conn = test_conn();

        assert!(try_acquire_slot(&conn, "o1", 1).expect("acquire should succeed"));
        assert!(!try_acquire_slot(&conn, "o1", 1).expect("o1 should be full"));
        assert!(try_acquire_slot(&conn, "o2", 1).expect("o2 should be unaffected"));
    }

    #[test]
    fn ceiling_refresh_applies_immediately() {
        let conn = test_conn();

        assert!(try_acquire_slot(&conn, "o1", 1).expect("acquire should succeed"));
        assert!(!try_acquire_slot(&conn, "o1", 1).expect("at ceiling"));
        // A raised ceiling admits the next run without releasing anything.
        assert!(try_acquire_slot(&conn, "o1", 2).expect("raised ceiling should admit"));
    }
}
