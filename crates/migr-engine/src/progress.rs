//! `_migration_progress` (new DB): the Replayer's checkpoint, read by the
//! Migration Controller to decide whether `cutover` is legal (§3, §4.7).

use rusqlite::{Connection, OptionalExtension};

use migr_core::error::Result;

pub const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS _migration_progress (
    id                     INTEGER NOT NULL PRIMARY KEY CHECK (id = 0),
    last_replayed_log_id   INTEGER NOT NULL,
    drain_completed        INTEGER NOT NULL CHECK (drain_completed IN (0, 1))
);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub last_replayed_log_id: i64,
    pub drain_completed: bool,
}

pub fn install(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLE)?;
    conn.execute(
        "INSERT OR IGNORE INTO _migration_progress (id, last_replayed_log_id, drain_completed) VALUES (0, 0, 0)",
        [],
    )?;
    Ok(())
}

pub fn drop_table(conn: &Connection) -> Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS _migration_progress;")?;
    Ok(())
}

pub fn read(conn: &Connection) -> Result<Option<Progress>> {
    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT last_replayed_log_id, drain_completed FROM _migration_progress WHERE id = 0",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(row.map(|(last, completed)| Progress { last_replayed_log_id: last, drain_completed: completed != 0 }))
}

/// Advance the checkpoint and optionally flip `drain_completed`, inside the
/// caller's transaction so it commits atomically with the replayed group.
pub fn advance(conn: &Connection, last_replayed_log_id: i64, drain_completed: bool) -> Result<()> {
    conn.execute(
        "UPDATE _migration_progress SET last_replayed_log_id = ?1, drain_completed = ?2 WHERE id = 0",
        rusqlite::params![last_replayed_log_id, drain_completed as i64],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_seeds_zero_progress() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        let p = read(&conn).unwrap().unwrap();
        assert_eq!(p.last_replayed_log_id, 0);
        assert!(!p.drain_completed);
    }

    #[test]
    fn advance_updates_checkpoint() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        advance(&conn, 42, true).unwrap();
        let p = read(&conn).unwrap().unwrap();
        assert_eq!(p.last_replayed_log_id, 42);
        assert!(p.drain_completed);
    }
}
