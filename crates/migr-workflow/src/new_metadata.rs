//! New-DB metadata tables owned by the Migration Controller:
//! `_schema_identity` and `_migration_status` (§3). `_id_mapping` and
//! `_migration_progress` are installed/dropped through `migr_engine` since
//! the Bulk Copier and Replayer are their primary writers.

use rusqlite::{Connection, OptionalExtension};

use migr_core::error::{MigrError, Result};

pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS _schema_identity (
    id              INTEGER NOT NULL PRIMARY KEY CHECK (id = 0),
    schema_hash     TEXT    NOT NULL,
    schema_commit   TEXT,
    created_utc     TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS _migration_status (
    id      INTEGER NOT NULL PRIMARY KEY CHECK (id = 0),
    status  TEXT    NOT NULL
);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    InProgress,
    Ready,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::InProgress => "in_progress",
            Status::Ready => "ready",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(Status::InProgress),
            "ready" => Ok(Status::Ready),
            other => Err(MigrError::InvalidInput(format!("unknown migration status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaIdentity {
    pub schema_hash: String,
    pub schema_commit: Option<String>,
    pub created_utc: String,
}

pub fn install(conn: &Connection, identity: &SchemaIdentity) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    conn.execute(
        "INSERT OR IGNORE INTO _schema_identity (id, schema_hash, schema_commit, created_utc) VALUES (0, ?1, ?2, ?3)",
        rusqlite::params![identity.schema_hash, identity.schema_commit, identity.created_utc],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO _migration_status (id, status) VALUES (0, ?1)",
        rusqlite::params![Status::InProgress.as_str()],
    )?;
    Ok(())
}

pub fn read_identity(conn: &Connection) -> Result<Option<SchemaIdentity>> {
    conn.query_row(
        "SELECT schema_hash, schema_commit, created_utc FROM _schema_identity WHERE id = 0",
        [],
        |r| Ok(SchemaIdentity { schema_hash: r.get(0)?, schema_commit: r.get(1)?, created_utc: r.get(2)? }),
    )
    .optional()
    .map_err(MigrError::from)
}

pub fn read_status(conn: &Connection) -> Result<Option<Status>> {
    let s: Option<String> = conn
        .query_row("SELECT status FROM _migration_status WHERE id = 0", [], |r| r.get(0))
        .optional()?;
    s.map(|s| Status::from_str(&s)).transpose()
}

pub fn set_status(conn: &Connection, status: Status) -> Result<()> {
    conn.execute("UPDATE _migration_status SET status = ?1 WHERE id = 0", rusqlite::params![status.as_str()])?;
    Ok(())
}
