//! Old-DB metadata tables: `_migration_marker`, `_migration_log` (§3). These
//! are installed by the Migration Controller as the final step of `migrate`
//! and owned exclusively by this crate thereafter — the old DB never writes
//! any other metadata table. `txn_id` is a UUID minted at transaction start
//! (§4.5), not a counter, so there is no sequence table to seed.

use rusqlite::{Connection, OptionalExtension};

use migr_core::error::{MigrError, Result};

/// All `CREATE TABLE IF NOT EXISTS` DDL for the old-DB side, safe to run
/// more than once (idempotent, mirroring this workspace's migration runner).
pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS _migration_marker (
    id      INTEGER NOT NULL PRIMARY KEY CHECK (id = 0),
    status  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS _migration_log (
    ordering    INTEGER NOT NULL PRIMARY KEY,
    txn_id      TEXT    NOT NULL,
    table_name  TEXT    NOT NULL,
    op          TEXT    NOT NULL,
    source_pk   TEXT    NOT NULL,
    payload     TEXT
);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStatus {
    Recording,
    Draining,
}

impl MarkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerStatus::Recording => "recording",
            MarkerStatus::Draining => "draining",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "recording" => Ok(MarkerStatus::Recording),
            "draining" => Ok(MarkerStatus::Draining),
            other => Err(MigrError::InvalidInput(format!("unknown marker status: {other}"))),
        }
    }
}

/// Install the old-DB metadata tables and seed the marker as `recording`.
/// Called once, as the very last step of `migrate`, after the bulk copy has
/// fully committed (§4.8).
pub fn install(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    conn.execute(
        "INSERT OR IGNORE INTO _migration_marker (id, status) VALUES (0, ?1)",
        rusqlite::params![MarkerStatus::Recording.as_str()],
    )?;
    Ok(())
}

/// Drop both old-DB metadata tables (`cleanup-old`).
pub fn drop_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS _migration_marker;
         DROP TABLE IF EXISTS _migration_log;",
    )?;
    Ok(())
}

/// Reads the marker, tolerating a pre-migration database where
/// `_migration_marker` does not exist yet (§4.5: "no marker present").
pub fn marker_status(conn: &Connection) -> Result<Option<MarkerStatus>> {
    if !table_exists(conn, "_migration_marker")? {
        return Ok(None);
    }
    let status: Option<String> = conn
        .query_row("SELECT status FROM _migration_marker WHERE id = 0", [], |r| r.get(0))
        .optional()?;
    status.map(|s| MarkerStatus::from_str(&s)).transpose()
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_schema WHERE type = 'table' AND name = ?1",
        rusqlite::params![name],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

pub fn set_marker_status(conn: &Connection, status: MarkerStatus) -> Result<()> {
    conn.execute(
        "UPDATE _migration_marker SET status = ?1 WHERE id = 0",
        rusqlite::params![status.as_str()],
    )?;
    Ok(())
}

pub fn log_entry_count(conn: &Connection) -> Result<i64> {
    if !table_exists(conn, "_migration_log")? {
        return Ok(0);
    }
    Ok(conn.query_row("SELECT COUNT(*) FROM _migration_log", [], |r| r.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        install(&conn).unwrap();
        assert_eq!(marker_status(&conn).unwrap(), Some(MarkerStatus::Recording));
    }

    #[test]
    fn marker_transitions_to_draining() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        set_marker_status(&conn, MarkerStatus::Draining).unwrap();
        assert_eq!(marker_status(&conn).unwrap(), Some(MarkerStatus::Draining));
    }

    #[test]
    fn drop_all_removes_tables_and_marker_reads_none() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        drop_all(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_schema WHERE name = '_migration_marker'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
