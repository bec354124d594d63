//! Schema Introspector (C2): reads a live SQLite connection's `sqlite_schema`
//! into a [`Schema`]. Table structure and foreign keys are re-derived from
//! `PRAGMA table_info`/`foreign_key_list`/`index_list`/`index_info` rather
//! than re-parsed from stored DDL (§4.1); views and triggers keep their
//! stored DDL verbatim since there is no reliable pragma equivalent for them.

use rusqlite::Connection;

use crate::error::{MigrError, Result};
use crate::model::{
    Column, ColumnDefault, Constraint, ForeignKey, ForeignKeyAction, Index, Schema, SqlType,
    Table, Trigger, View, ViewBody,
};

/// Read the full schema visible on `conn`.
pub fn introspect(conn: &Connection) -> Result<Schema> {
    let table_names = user_table_names(conn)?;

    let mut tables = Vec::with_capacity(table_names.len());
    for name in &table_names {
        tables.push(introspect_table(conn, name)?);
    }

    let views = introspect_views(conn)?;
    let indexes = introspect_indexes(conn, &table_names)?;
    let triggers = introspect_triggers(conn)?;

    Ok(Schema { tables, views, indexes, triggers })
}

fn user_table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_schema
          WHERE type = 'table'
            AND name NOT LIKE 'sqlite_%'
            AND name NOT LIKE '\\_migration\\_%' ESCAPE '\\'
            AND name NOT LIKE '\\_schema\\_identity' ESCAPE '\\'
            AND name NOT LIKE '\\_id\\_mapping' ESCAPE '\\'
          ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| MigrError::IntrospectionFailed {
            file: "<connection>".into(),
            cause: e.to_string(),
        })?;
    Ok(names)
}

fn introspect_table(conn: &Connection, name: &str) -> Result<Table> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({name})"))?;
    let rows = stmt
        .query_map([], |row| {
            let col_name: String = row.get(1)?;
            let type_name: String = row.get(2)?;
            let notnull: i64 = row.get(3)?;
            let default_value: Option<String> = row.get(4)?;
            let pk_index: i64 = row.get(5)?;
            Ok((col_name, type_name, notnull, default_value, pk_index))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut columns = Vec::with_capacity(rows.len());
    let mut pk_columns: Vec<(i64, String)> = Vec::new();

    for (col_name, type_name, notnull, default_value, pk_index) in rows {
        let sql_type = SqlType::from_str(&type_name).map_err(|_| MigrError::IntrospectionFailed {
            file: "<connection>".into(),
            cause: format!("table {name} column {col_name} has unrecognized type {type_name}"),
        })?;
        if pk_index > 0 {
            pk_columns.push((pk_index, col_name.clone()));
        }
        columns.push(Column {
            name: col_name,
            sql_type,
            nullable: notnull == 0,
            default: default_value.map(ColumnDefault::Expr),
        });
    }

    let mut constraints = Vec::new();
    if !pk_columns.is_empty() {
        pk_columns.sort_by_key(|(idx, _)| *idx);
        let pk_cols: Vec<String> = pk_columns.into_iter().map(|(_, c)| c).collect();
        let autoincrement = is_autoincrement(conn, name)?;
        constraints.push(Constraint::PrimaryKey { columns: pk_cols, autoincrement });
    }

    constraints.extend(introspect_foreign_keys(conn, name)?);

    Ok(Table {
        name: name.to_string(),
        columns,
        constraints,
        annotations: Vec::new(),
        rename_hints: Vec::new(),
    })
}

fn is_autoincrement(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_schema WHERE type = 'table' AND name = 'sqlite_sequence'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if count == 0 {
        return Ok(false);
    }
    let found: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_sequence WHERE name = ?1",
            rusqlite::params![table],
            |r| r.get(0),
        )
        .unwrap_or(0);
    Ok(found > 0)
}

fn introspect_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<Constraint>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({table})"))?;
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let seq: i64 = row.get(1)?;
            let ref_table: String = row.get(2)?;
            let from: String = row.get(3)?;
            let to: String = row.get(4)?;
            let on_update: String = row.get(5)?;
            let on_delete: String = row.get(6)?;
            Ok((id, seq, ref_table, from, to, on_update, on_delete))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    use std::collections::BTreeMap;
    let mut grouped: BTreeMap<i64, Vec<(i64, String, String, String, String, String)>> = BTreeMap::new();
    for (id, seq, ref_table, from, to, on_update, on_delete) in rows {
        grouped.entry(id).or_default().push((seq, ref_table, from, to, on_update, on_delete));
    }

    let mut out = Vec::new();
    for (_, mut entries) in grouped {
        entries.sort_by_key(|(seq, ..)| *seq);
        let (_, ref_table, _, _, on_update, on_delete) = entries[0].clone();
        let columns: Vec<String> = entries.iter().map(|e| e.2.clone()).collect();
        let ref_columns: Vec<String> = entries.iter().map(|e| e.3.clone()).collect();
        out.push(Constraint::ForeignKey(ForeignKey {
            columns,
            ref_table,
            ref_columns,
            on_delete: parse_fk_action(&on_delete)?,
            on_update: parse_fk_action(&on_update)?,
        }));
    }
    Ok(out)
}

fn parse_fk_action(s: &str) -> Result<ForeignKeyAction> {
    ForeignKeyAction::from_str(s).or(Ok(ForeignKeyAction::NoAction))
}

fn introspect_views(conn: &Connection) -> Result<Vec<View>> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_schema WHERE type = 'view' ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let sql: Option<String> = row.get(1)?;
            Ok((name, sql.unwrap_or_default()))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .map(|(name, sql)| View { name, body: ViewBody::Literal(sql), depends_on: Vec::new() })
        .collect())
}

fn introspect_indexes(conn: &Connection, table_names: &[String]) -> Result<Vec<Index>> {
    let mut out = Vec::new();
    for table in table_names {
        let mut stmt = conn.prepare(&format!("PRAGMA index_list({table})"))?;
        let idx_rows = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let unique: i64 = row.get(2)?;
                let origin: String = row.get(3)?;
                Ok((name, unique != 0, origin))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for (name, unique, origin) in idx_rows {
            // Skip implicit indexes backing inline PK/UNIQUE constraints;
            // those are already represented on the Table itself.
            if origin != "c" {
                continue;
            }
            let mut info_stmt = conn.prepare(&format!("PRAGMA index_info({name})"))?;
            let columns = info_stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(Index { name, table: table.clone(), columns, unique });
        }
    }
    Ok(out)
}

fn introspect_triggers(conn: &Connection) -> Result<Vec<Trigger>> {
    let mut stmt = conn.prepare(
        "SELECT name, tbl_name, sql FROM sqlite_schema WHERE type = 'trigger' ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let table: String = row.get(1)?;
            let sql: Option<String> = row.get(2)?;
            Ok((name, table, sql.unwrap_or_default()))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .map(|(name, table, body)| Trigger { name, table, body })
        .collect())
}
