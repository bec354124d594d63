//! Bulk Copier (C7): executes a Copy Plan against the new DB, resolving
//! foreign keys through the in-memory identity map and persisting identity
//! mappings for single-integer-PK tables as it goes (§4.6).

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, TransactionBehavior};

use migr_core::db::DbPool;
use migr_core::error::{MigrError, Result};
use migr_core::model::{Schema, SqlType, Table};
use migr_plan::{ColumnMapping, ColumnStrategy, TableCopyPlan};

use crate::identity;

type IdentityMap = HashMap<(String, i64), i64>;

/// Run the full copy: one new-DB connection for the duration so the
/// `PRAGMA foreign_keys = OFF` envelope spans every table and is restored
/// `ON` only once, before the caller's final commit (§4.6, §5).
pub fn bulk_copy(old_pool: &DbPool, new_pool: &DbPool, target: &Schema, plans: &[TableCopyPlan]) -> Result<()> {
    let mut new_conn = migr_core::db::get(new_pool)?;
    identity::install(&new_conn)?;
    let mut id_map = identity::load_all(&new_conn)?;

    new_conn.execute_batch("PRAGMA foreign_keys = OFF;")?;

    for plan in plans {
        copy_table(old_pool, &mut new_conn, target, plan, &mut id_map)
            .map_err(|e| MigrError::CopyFailed { table: plan.target.clone(), cause: e.to_string() })?;
    }

    new_conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

fn copy_table(
    old_pool: &DbPool,
    new_conn: &mut Connection,
    target: &Schema,
    plan: &TableCopyPlan,
    id_map: &mut IdentityMap,
) -> Result<()> {
    let target_table = target.table(&plan.target).expect("copy plan targets a table present in the schema");
    let tx = new_conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(source_table) = &plan.source {
        let old_conn = migr_core::db::get(old_pool)?;
        let mut stmt = old_conn.prepare(&format!("SELECT * FROM {source_table}"))?;
        let column_names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt.query([])?;

        let insert_sql = insert_statement(target_table, &plan.column_plan);
        let pk_col = target_table.primary_key().and_then(|c| c.first().cloned());

        while let Some(row) = rows.next()? {
            let mut source_row = HashMap::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                let value: SqlValue = row.get(i)?;
                source_row.insert(name.clone(), value);
            }

            let values = resolve_row(target_table, &plan.column_plan, &source_row, id_map)?;
            tx.execute(&insert_sql, rusqlite::params_from_iter(values.iter()))?;

            if plan.map_identity {
                if let Some(src_pk) = source_pk(&plan.column_plan, pk_col.as_deref(), &source_row) {
                    let new_pk = tx.last_insert_rowid();
                    identity::upsert(&tx, &plan.target, src_pk, new_pk)?;
                    id_map.insert((plan.target.clone(), src_pk), new_pk);
                }
            }
        }
    }

    tx.commit()?;
    Ok(())
}

fn insert_statement(table: &Table, mappings: &[ColumnMapping]) -> String {
    let cols: Vec<&str> = mappings.iter().map(|m| m.target_column.as_str()).collect();
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
    format!("INSERT INTO {} ({}) VALUES ({})", table.name, cols.join(", "), placeholders.join(", "))
}

fn source_pk(mappings: &[ColumnMapping], pk_col: Option<&str>, source_row: &HashMap<String, SqlValue>) -> Option<i64> {
    let pk_col = pk_col?;
    let mapping = mappings.iter().find(|m| m.target_column == pk_col)?;
    match &mapping.strategy {
        ColumnStrategy::SourceColumn(src_name) => match source_row.get(src_name) {
            Some(SqlValue::Integer(i)) => Some(*i),
            _ => None,
        },
        _ => None,
    }
}

fn resolve_row(
    target_table: &Table,
    mappings: &[ColumnMapping],
    source_row: &HashMap<String, SqlValue>,
    id_map: &IdentityMap,
) -> Result<Vec<SqlValue>> {
    let fk_by_col: HashMap<&str, &str> = target_table
        .foreign_keys()
        .filter(|fk| fk.columns.len() == 1 && fk.ref_columns.len() == 1)
        .map(|fk| (fk.columns[0].as_str(), fk.ref_table.as_str()))
        .collect();

    let mut values = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let mut value = match &mapping.strategy {
            ColumnStrategy::SourceColumn(src_name) => source_row.get(src_name).cloned().unwrap_or(SqlValue::Null),
            ColumnStrategy::DefaultExpr(expr) => default_expr_value(expr),
            ColumnStrategy::TypeDefault => type_default_value(target_table, &mapping.target_column),
        };

        if let Some(&ref_table) = fk_by_col.get(mapping.target_column.as_str()) {
            if let SqlValue::Integer(src_pk) = value {
                match id_map.get(&(ref_table.to_string(), src_pk)) {
                    Some(&mapped) => value = SqlValue::Integer(mapped),
                    None => {
                        return Err(MigrError::MissingIdentityMapping { table: ref_table.to_string(), src_pk });
                    }
                }
            }
        }
        values.push(value);
    }
    Ok(values)
}

pub(crate) fn default_expr_value(expr: &str) -> SqlValue {
    let trimmed = expr.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        SqlValue::Null
    } else if let Ok(i) = trimmed.parse::<i64>() {
        SqlValue::Integer(i)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        SqlValue::Real(f)
    } else {
        SqlValue::Text(trimmed.trim_matches('\'').to_string())
    }
}

pub(crate) fn type_default_value(table: &Table, col_name: &str) -> SqlValue {
    let col = table.column(col_name).expect("mapping target column exists on its own table");
    if col.nullable {
        return SqlValue::Null;
    }
    match col.sql_type {
        SqlType::Integer => SqlValue::Integer(0),
        SqlType::Text | SqlType::Timestamp => SqlValue::Text(String::new()),
        SqlType::Real => SqlValue::Real(0.0),
        SqlType::Blob => SqlValue::Blob(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migr_core::db::create_memory_pool;
    use migr_core::model::{Column, ColumnDefault, Constraint, ForeignKey, ForeignKeyAction};
    use migr_plan::preflight::preflight;

    fn int_col(name: &str) -> Column {
        Column { name: name.to_string(), sql_type: SqlType::Integer, nullable: false, default: None }
    }

    #[test]
    fn copies_rows_with_rename_hint() {
        let old_pool = create_memory_pool().unwrap();
        {
            let conn = migr_core::db::get(&old_pool).unwrap();
            conn.execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, full_name TEXT NOT NULL);
                 INSERT INTO users (id, full_name) VALUES (1, 'Ada');",
            )
            .unwrap();
        }

        let mut target_table = Table {
            name: "users".into(),
            columns: vec![int_col("id"), Column { name: "name".into(), sql_type: SqlType::Text, nullable: false, default: None }],
            constraints: vec![Constraint::PrimaryKey { columns: vec!["id".into()], autoincrement: true }],
            annotations: vec![],
            rename_hints: vec![],
        };
        target_table.rename_hints.push(("full_name".to_string(), "name".to_string()));
        let target = Schema { tables: vec![target_table], ..Default::default() };
        let source = Schema {
            tables: vec![Table {
                name: "users".into(),
                columns: vec![int_col("id"), Column { name: "full_name".into(), sql_type: SqlType::Text, nullable: false, default: None }],
                constraints: vec![Constraint::PrimaryKey { columns: vec!["id".into()], autoincrement: true }],
                annotations: vec![],
                rename_hints: vec![],
            }],
            ..Default::default()
        };

        let report = preflight(&source, &target);
        assert!(report.is_runnable());
        let plan = migr_plan::build_copy_plan(&source, &target, &report);

        let new_pool = create_memory_pool().unwrap();
        {
            let conn = migr_core::db::get(&new_pool).unwrap();
            conn.execute_batch(&migr_core::ddl::render_schema(&target)).unwrap();
        }

        bulk_copy(&old_pool, &new_pool, &target, &plan).unwrap();

        let new_conn = migr_core::db::get(&new_pool).unwrap();
        let name: String = new_conn.query_row("SELECT name FROM users WHERE id = 1", [], |r| r.get(0)).unwrap();
        assert_eq!(name, "Ada");
        let mapped: i64 = new_conn
            .query_row("SELECT tgt_pk FROM _id_mapping WHERE table_name = 'users' AND src_pk = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mapped, 1);
    }

    #[test]
    fn added_column_gets_its_default() {
        let old_pool = create_memory_pool().unwrap();
        {
            let conn = migr_core::db::get(&old_pool).unwrap();
            conn.execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, qty INTEGER NOT NULL);
                 INSERT INTO items (id, qty) VALUES (1, 5);",
            )
            .unwrap();
        }

        let source = Schema {
            tables: vec![Table {
                name: "items".into(),
                columns: vec![int_col("id"), int_col("qty")],
                constraints: vec![Constraint::PrimaryKey { columns: vec!["id".into()], autoincrement: true }],
                annotations: vec![],
                rename_hints: vec![],
            }],
            ..Default::default()
        };
        let mut target_table = source.tables[0].clone();
        target_table.columns.push(Column {
            name: "label".into(),
            sql_type: SqlType::Text,
            nullable: false,
            default: Some(ColumnDefault::Literal("n/a".into())),
        });
        let target = Schema { tables: vec![target_table], ..Default::default() };

        let report = preflight(&source, &target);
        let plan = migr_plan::build_copy_plan(&source, &target, &report);

        let new_pool = create_memory_pool().unwrap();
        {
            let conn = migr_core::db::get(&new_pool).unwrap();
            conn.execute_batch(&migr_core::ddl::render_schema(&target)).unwrap();
        }
        bulk_copy(&old_pool, &new_pool, &target, &plan).unwrap();

        let new_conn = migr_core::db::get(&new_pool).unwrap();
        let label: String = new_conn.query_row("SELECT label FROM items WHERE id = 1", [], |r| r.get(0)).unwrap();
        assert_eq!(label, "n/a");
    }

    #[test]
    fn fk_values_are_remapped_in_dependency_order() {
        let old_pool = create_memory_pool().unwrap();
        {
            let conn = migr_core::db::get(&old_pool).unwrap();
            conn.execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY);
                 CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL);
                 INSERT INTO users (id) VALUES (10), (20);
                 INSERT INTO orders (id, user_id) VALUES (100, 10), (101, 20), (102, 10);",
            )
            .unwrap();
        }

        let users = Table {
            name: "users".into(),
            columns: vec![int_col("id")],
            constraints: vec![Constraint::PrimaryKey { columns: vec!["id".into()], autoincrement: true }],
            annotations: vec![],
            rename_hints: vec![],
        };
        let mut orders = Table {
            name: "orders".into(),
            columns: vec![int_col("id"), int_col("user_id")],
            constraints: vec![Constraint::PrimaryKey { columns: vec!["id".into()], autoincrement: true }],
            annotations: vec![],
            rename_hints: vec![],
        };
        orders.constraints.push(Constraint::ForeignKey(ForeignKey {
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_columns: vec!["id".into()],
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }));

        let schema = Schema { tables: vec![orders, users], ..Default::default() };
        let report = preflight(&Schema::default(), &schema);
        assert_eq!(report.copy_order, vec!["users".to_string(), "orders".to_string()]);
        let plan = migr_plan::build_copy_plan(&schema, &schema, &report);

        let new_pool = create_memory_pool().unwrap();
        {
            let conn = migr_core::db::get(&new_pool).unwrap();
            conn.execute_batch(&migr_core::ddl::render_schema(&schema)).unwrap();
        }
        bulk_copy(&old_pool, &new_pool, &schema, &plan).unwrap();

        let new_conn = migr_core::db::get(&new_pool).unwrap();
        let mut stmt = new_conn.prepare("SELECT user_id FROM orders ORDER BY id").unwrap();
        let user_ids: Vec<i64> = stmt.query_map([], |r| r.get(0)).unwrap().collect::<rusqlite::Result<_>>().unwrap();
        // All three orders' user_id must resolve to ids that exist in the copied users table.
        let mut existing_users: Vec<i64> = new_conn
            .prepare("SELECT id FROM users")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        existing_users.sort_unstable();
        for uid in &user_ids {
            assert!(existing_users.contains(uid));
        }
        assert_eq!(user_ids[0], user_ids[2]);
    }
}
