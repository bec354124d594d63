//! `_id_mapping` (new DB): the persisted identity bijection `(table, source
//! pk) -> target pk`, written during both bulk copy and replay (§3, §9).
//! Composite PKs are never entered here — callers only call these helpers
//! for tables where `TableCopyPlan::map_identity` is true.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};

use migr_core::error::Result;

pub const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS _id_mapping (
    table_name  TEXT    NOT NULL,
    src_pk      INTEGER NOT NULL,
    tgt_pk      INTEGER NOT NULL,
    PRIMARY KEY (table_name, src_pk)
);
";

pub fn install(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLE)?;
    Ok(())
}

pub fn drop_table(conn: &Connection) -> Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS _id_mapping;")?;
    Ok(())
}

pub fn upsert(conn: &Connection, table: &str, src_pk: i64, tgt_pk: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO _id_mapping (table_name, src_pk, tgt_pk) VALUES (?1, ?2, ?3)
         ON CONFLICT(table_name, src_pk) DO UPDATE SET tgt_pk = excluded.tgt_pk",
        rusqlite::params![table, src_pk, tgt_pk],
    )?;
    Ok(())
}

pub fn lookup(conn: &Connection, table: &str, src_pk: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT tgt_pk FROM _id_mapping WHERE table_name = ?1 AND src_pk = ?2",
            rusqlite::params![table, src_pk],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM _id_mapping", [], |r| r.get(0))?)
}

/// Load the entire mapping into memory, keyed `(table, src_pk) -> tgt_pk`,
/// for the Bulk Copier to consult while resolving FK columns within one
/// `migrate` invocation (§4.6).
pub fn load_all(conn: &Connection) -> Result<HashMap<(String, i64), i64>> {
    let mut stmt = conn.prepare("SELECT table_name, src_pk, tgt_pk FROM _id_mapping")?;
    let rows = stmt
        .query_map([], |r| Ok(((r.get::<_, String>(0)?, r.get::<_, i64>(1)?), r.get::<_, i64>(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_lookup_round_trips() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        upsert(&conn, "users", 3, 30).unwrap();
        assert_eq!(lookup(&conn, "users", 3).unwrap(), Some(30));
        assert_eq!(lookup(&conn, "users", 4).unwrap(), None);
    }

    #[test]
    fn upsert_overwrites_existing_mapping() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        upsert(&conn, "users", 3, 30).unwrap();
        upsert(&conn, "users", 3, 99).unwrap();
        assert_eq!(lookup(&conn, "users", 3).unwrap(), Some(99));
        assert_eq!(count(&conn).unwrap(), 1);
    }

    #[test]
    fn load_all_returns_full_map() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        upsert(&conn, "users", 1, 10).unwrap();
        upsert(&conn, "orders", 1, 50).unwrap();
        let map = load_all(&conn).unwrap();
        assert_eq!(map.get(&("users".to_string(), 1)), Some(&10));
        assert_eq!(map.get(&("orders".to_string(), 1)), Some(&50));
    }
}
