//! Journal (C6) and Transactional Write API boundary (C10): the write path
//! applications link against, and the on-disk log it feeds (§4.5, §6).

use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value as Json;
use uuid::Uuid;

use migr_core::db::DbPool;
use migr_core::error::{MigrError, Result};

use crate::old_metadata::{self, MarkerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    Update,
    Delete,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Insert => "insert",
            Op::Update => "update",
            Op::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(Op::Insert),
            "update" => Ok(Op::Update),
            "delete" => Ok(Op::Delete),
            other => Err(MigrError::InvalidInput(format!("unknown journal op: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub ordering: i64,
    pub txn_id: String,
    pub table_name: String,
    pub op: Op,
    pub source_pk: Vec<Json>,
    /// `(column name, value)` pairs reflecting the source table's shape at
    /// write time — named rather than purely positional so the Replayer can
    /// resolve each value through the target's column plan by name alone,
    /// independent of any column reordering between recording and drain.
    pub payload: Option<Vec<(String, Json)>>,
}

struct Pending {
    table_name: String,
    op: Op,
    source_pk: Vec<Json>,
    payload: Option<Vec<(String, Json)>>,
}

/// Transaction-local buffer threaded through the application's write closure
/// (§9, "computation-expression buffer during a transaction").
pub struct WriteContext {
    marker: Option<MarkerStatus>,
    txn_id: String,
    buffered: Vec<Pending>,
}

impl WriteContext {
    fn check_writable(&self) -> Result<()> {
        if self.marker == Some(MarkerStatus::Draining) {
            return Err(MigrError::WriteRejected);
        }
        Ok(())
    }

    pub fn record_insert(&mut self, table: &str, pk: Vec<Json>, payload: Vec<(String, Json)>) -> Result<()> {
        self.check_writable()?;
        self.buffered.push(Pending { table_name: table.to_string(), op: Op::Insert, source_pk: pk, payload: Some(payload) });
        Ok(())
    }

    pub fn record_update(&mut self, table: &str, pk: Vec<Json>, payload: Vec<(String, Json)>) -> Result<()> {
        self.check_writable()?;
        self.buffered.push(Pending { table_name: table.to_string(), op: Op::Update, source_pk: pk, payload: Some(payload) });
        Ok(())
    }

    pub fn record_delete(&mut self, table: &str, pk: Vec<Json>) -> Result<()> {
        self.check_writable()?;
        self.buffered.push(Pending { table_name: table.to_string(), op: Op::Delete, source_pk: pk, payload: None });
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.marker == Some(MarkerStatus::Recording)
    }
}

/// Run `f` inside a `BEGIN IMMEDIATE` transaction against the old DB. The
/// marker is read once at the start; if `recording`, buffered entries are
/// flushed to `_migration_log` under one fresh `txn_id` before commit. If no
/// marker is present (pre-migration DB), writes proceed with nothing logged.
/// If `draining`, any call to a `record_*` hook fails the transaction with
/// `WriteRejected`; reads inside `f` are unaffected.
pub fn run_transaction<T>(
    pool: &DbPool,
    f: impl FnOnce(&rusqlite::Transaction, &mut WriteContext) -> Result<T>,
) -> Result<T> {
    let mut conn = migr_core::db::get(pool)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let marker = old_metadata::marker_status(&tx)?;
    let txn_id = if marker == Some(MarkerStatus::Recording) { Uuid::new_v4().to_string() } else { String::new() };

    let mut ctx = WriteContext { marker, txn_id, buffered: Vec::new() };

    match f(&tx, &mut ctx) {
        Ok(value) => {
            if ctx.is_recording() {
                flush(&tx, &ctx)?;
            }
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

fn flush(conn: &Connection, ctx: &WriteContext) -> Result<()> {
    for entry in &ctx.buffered {
        let source_pk = serde_json::to_string(&entry.source_pk)?;
        let payload = entry.payload.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO _migration_log (txn_id, table_name, op, source_pk, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![ctx.txn_id, entry.table_name, entry.op.as_str(), source_pk, payload],
        )?;
    }
    Ok(())
}

/// Read the full journal, ascending by `ordering`, starting strictly after
/// `after_ordering` (used by the Replayer to resume from a checkpoint).
pub fn read_log_since(conn: &Connection, after_ordering: i64) -> Result<Vec<JournalEntry>> {
    let mut stmt = conn.prepare(
        "SELECT ordering, txn_id, table_name, op, source_pk, payload
           FROM _migration_log
          WHERE ordering > ?1
          ORDER BY ordering ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![after_ordering], |row| {
            let ordering: i64 = row.get(0)?;
            let txn_id: String = row.get(1)?;
            let table_name: String = row.get(2)?;
            let op: String = row.get(3)?;
            let source_pk: String = row.get(4)?;
            let payload: Option<String> = row.get(5)?;
            Ok((ordering, txn_id, table_name, op, source_pk, payload))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(ordering, txn_id, table_name, op, source_pk, payload)| {
            Ok(JournalEntry {
                ordering,
                txn_id,
                table_name,
                op: Op::from_str(&op)?,
                source_pk: serde_json::from_str(&source_pk)?,
                payload: payload.map(|p| serde_json::from_str(&p)).transpose()?,
            })
        })
        .collect()
}

/// Count journal entries strictly after `after_ordering`, used by the
/// Migration Controller's `status` command to report pending replay.
pub fn count_since(conn: &Connection, after_ordering: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM _migration_log WHERE ordering > ?1",
        rusqlite::params![after_ordering],
        |r| r.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use migr_core::db::create_memory_pool;
    use serde_json::json;

    fn pool_with_marker(status: MarkerStatus) -> DbPool {
        let pool = create_memory_pool().unwrap();
        let conn = migr_core::db::get(&pool).unwrap();
        old_metadata::install(&conn).unwrap();
        old_metadata::set_marker_status(&conn, status).unwrap();
        pool
    }

    #[test]
    fn recording_flushes_buffered_entries() {
        let pool = pool_with_marker(MarkerStatus::Recording);
        run_transaction(&pool, |_tx, ctx| {
            ctx.record_insert("users", vec![json!(1)], vec![("id".to_string(), json!(1)), ("name".to_string(), json!("Ada"))])
        })
        .unwrap();

        let conn = migr_core::db::get(&pool).unwrap();
        let entries = read_log_since(&conn, 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].table_name, "users");
        assert_eq!(entries[0].op, Op::Insert);
    }

    #[test]
    fn draining_rejects_writes() {
        let pool = pool_with_marker(MarkerStatus::Draining);
        let result = run_transaction(&pool, |_tx, ctx| {
            ctx.record_insert("users", vec![json!(1)], vec![("id".to_string(), json!(1))])
        });
        assert!(matches!(result, Err(MigrError::WriteRejected)));
    }

    #[test]
    fn draining_allows_reads() {
        let pool = pool_with_marker(MarkerStatus::Draining);
        let result = run_transaction(&pool, |_tx, _ctx| Ok(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn rollback_on_error_discards_buffer() {
        let pool = pool_with_marker(MarkerStatus::Recording);
        let result: Result<()> = run_transaction(&pool, |_tx, ctx| {
            ctx.record_insert("users", vec![json!(1)], vec![("id".to_string(), json!(1))])?;
            Err(MigrError::Internal("boom".into()))
        });
        assert!(result.is_err());

        let conn = migr_core::db::get(&pool).unwrap();
        let entries = read_log_since(&conn, 0).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn entries_in_one_transaction_share_txn_id() {
        let pool = pool_with_marker(MarkerStatus::Recording);
        run_transaction(&pool, |_tx, ctx| {
            ctx.record_insert("users", vec![json!(1)], vec![("id".to_string(), json!(1))])?;
            ctx.record_insert("orders", vec![json!(1)], vec![("id".to_string(), json!(1))])
        })
        .unwrap();

        let conn = migr_core::db::get(&pool).unwrap();
        let entries = read_log_since(&conn, 0).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].txn_id, entries[1].txn_id);
        assert!(entries[0].ordering < entries[1].ordering);
        assert!(Uuid::parse_str(&entries[0].txn_id).is_ok());
    }

    #[test]
    fn no_marker_present_does_not_log() {
        let pool = create_memory_pool().unwrap();
        let result = run_transaction(&pool, |_tx, ctx| {
            // no install() called: marker absent, so record_* would panic on
            // a missing table if invoked; exercise the read-only path only.
            let _ = ctx;
            Ok(())
        });
        assert!(result.is_ok());
    }
}
