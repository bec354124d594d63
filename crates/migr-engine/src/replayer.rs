//! Replayer (C8): drains `_migration_log` into the new DB, translating
//! source identities to target identities as it goes (§4.7).

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::TransactionBehavior;
use serde_json::Value as Json;

use migr_core::db::DbPool;
use migr_core::error::{MigrError, Result};
use migr_core::model::Schema;
use migr_plan::{ColumnMapping, ColumnStrategy, TableCopyPlan};

use crate::identity;
use crate::journal::{self, JournalEntry, Op};
use crate::old_metadata;
use crate::progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    pub groups_replayed: usize,
    pub drain_completed: bool,
}

/// Replay every committed application transaction recorded since the last
/// checkpoint, re-polling until a pass sees nothing new (§4.7).
pub fn drain(old_pool: &DbPool, new_pool: &DbPool, target: &Schema, plans: &[TableCopyPlan]) -> Result<DrainOutcome> {
    let plan_by_table: HashMap<&str, &TableCopyPlan> = plans.iter().map(|p| (p.target.as_str(), p)).collect();
    let mut groups_replayed = 0;

    loop {
        let checkpoint = {
            let new_conn = migr_core::db::get(new_pool)?;
            progress::read(&new_conn)?.map(|p| p.last_replayed_log_id).unwrap_or(0)
        };

        let entries = {
            let old_conn = migr_core::db::get(old_pool)?;
            journal::read_log_since(&old_conn, checkpoint)?
        };

        if entries.is_empty() {
            let new_conn = migr_core::db::get(new_pool)?;
            progress::advance(&new_conn, checkpoint, true)?;
            return Ok(DrainOutcome { groups_replayed, drain_completed: true });
        }

        for group in group_by_txn(entries) {
            replay_group(new_pool, target, &plan_by_table, &group)?;
            groups_replayed += 1;
        }
    }
}

/// Set the old-DB marker to `draining` before the first replay pass, per
/// §4.8's precondition for the `drain` command.
pub fn begin_draining(old_pool: &DbPool) -> Result<()> {
    let conn = migr_core::db::get(old_pool)?;
    old_metadata::set_marker_status(&conn, old_metadata::MarkerStatus::Draining)
}

fn group_by_txn(entries: Vec<JournalEntry>) -> Vec<Vec<JournalEntry>> {
    let mut groups: Vec<Vec<JournalEntry>> = Vec::new();
    for entry in entries {
        match groups.last_mut() {
            Some(last) if last[0].txn_id == entry.txn_id => last.push(entry),
            _ => groups.push(vec![entry]),
        }
    }
    groups
}

fn replay_group(
    new_pool: &DbPool,
    target: &Schema,
    plan_by_table: &HashMap<&str, &TableCopyPlan>,
    group: &[JournalEntry],
) -> Result<()> {
    let mut new_conn = migr_core::db::get(new_pool)?;
    let tx = new_conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let max_ordering = group.iter().map(|e| e.ordering).max().unwrap_or(0);
    let txn_id = group.first().map(|e| e.txn_id.clone()).unwrap_or_default();

    let result: Result<()> = (|| {
        for entry in group {
            let plan = plan_by_table.get(entry.table_name.as_str());
            let target_table = target.table(&entry.table_name);
            let (Some(plan), Some(target_table)) = (plan, target_table) else {
                // Table dropped in the target schema: nothing to replay.
                continue;
            };
            replay_entry(&tx, target_table, plan, entry)?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            progress::advance(&tx, max_ordering, false)?;
            tx.commit()?;
            Ok(())
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(MigrError::ReplayFailed { txn_id, cause: e.to_string() })
        }
    }
}

fn replay_entry(
    tx: &rusqlite::Transaction,
    target_table: &migr_core::model::Table,
    plan: &TableCopyPlan,
    entry: &JournalEntry,
) -> Result<()> {
    match entry.op {
        Op::Insert => replay_insert(tx, target_table, plan, entry),
        Op::Update => replay_update(tx, target_table, plan, entry),
        Op::Delete => replay_delete(tx, target_table, plan, entry),
    }
}

fn payload_map(entry: &JournalEntry) -> HashMap<&str, &Json> {
    entry
        .payload
        .as_ref()
        .map(|pairs| pairs.iter().map(|(k, v)| (k.as_str(), v)).collect())
        .unwrap_or_default()
}

fn json_to_sql(value: &Json) -> SqlValue {
    match value {
        Json::Null => SqlValue::Null,
        Json::Bool(b) => SqlValue::Integer(*b as i64),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn resolve_replay_value(
    target_table: &migr_core::model::Table,
    mapping: &ColumnMapping,
    payload: &HashMap<&str, &Json>,
    tx: &rusqlite::Transaction,
) -> Result<SqlValue> {
    let mut value = match &mapping.strategy {
        ColumnStrategy::SourceColumn(src_name) => match payload.get(src_name.as_str()) {
            Some(json) => json_to_sql(json),
            None => SqlValue::Null,
        },
        ColumnStrategy::DefaultExpr(expr) => crate::copier::default_expr_value(expr),
        ColumnStrategy::TypeDefault => crate::copier::type_default_value(target_table, &mapping.target_column),
    };

    if let Some(fk) = target_table.foreign_keys().find(|fk| fk.columns == [mapping.target_column.clone()]) {
        if fk.ref_columns.len() == 1 {
            if let SqlValue::Integer(src_pk) = value {
                let mapped = identity::lookup(tx, &fk.ref_table, src_pk)?;
                value = match mapped {
                    Some(m) => SqlValue::Integer(m),
                    None => return Err(MigrError::MissingIdentityMapping { table: fk.ref_table.clone(), src_pk }),
                };
            }
        }
    }
    Ok(value)
}

fn single_source_pk(entry: &JournalEntry) -> Option<i64> {
    match entry.source_pk.first() {
        Some(Json::Number(n)) => n.as_i64(),
        _ => None,
    }
}

fn replay_insert(
    tx: &rusqlite::Transaction,
    target_table: &migr_core::model::Table,
    plan: &TableCopyPlan,
    entry: &JournalEntry,
) -> Result<()> {
    let payload = payload_map(entry);
    let mut cols = Vec::with_capacity(plan.column_plan.len());
    let mut values = Vec::with_capacity(plan.column_plan.len());
    for mapping in &plan.column_plan {
        cols.push(mapping.target_column.as_str());
        values.push(resolve_replay_value(target_table, mapping, &payload, tx)?);
    }
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
    let sql = format!("INSERT INTO {} ({}) VALUES ({})", plan.target, cols.join(", "), placeholders.join(", "));
    tx.execute(&sql, rusqlite::params_from_iter(values.iter()))?;

    if plan.map_identity {
        if let Some(src_pk) = single_source_pk(entry) {
            let new_pk = tx.last_insert_rowid();
            identity::upsert(tx, &plan.target, src_pk, new_pk)?;
        }
    }
    Ok(())
}

fn replay_update(
    tx: &rusqlite::Transaction,
    target_table: &migr_core::model::Table,
    plan: &TableCopyPlan,
    entry: &JournalEntry,
) -> Result<()> {
    let Some(src_pk) = single_source_pk(entry) else {
        return Ok(());
    };
    let pk_col = target_table.primary_key().and_then(|c| c.first()).cloned().unwrap_or_else(|| "id".to_string());
    let target_pk = if plan.map_identity {
        match identity::lookup(tx, &plan.target, src_pk)? {
            Some(pk) => pk,
            None => return Err(MigrError::UnmappedUpdate { table: plan.target.clone(), src_pk }),
        }
    } else {
        src_pk
    };

    let payload = payload_map(entry);
    let mut assignments = Vec::with_capacity(plan.column_plan.len());
    let mut values = Vec::with_capacity(plan.column_plan.len());
    for (i, mapping) in plan.column_plan.iter().enumerate() {
        assignments.push(format!("{} = ?{}", mapping.target_column, i + 1));
        values.push(resolve_replay_value(target_table, mapping, &payload, tx)?);
    }
    values.push(SqlValue::Integer(target_pk));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        plan.target,
        assignments.join(", "),
        pk_col,
        plan.column_plan.len() + 1
    );
    tx.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
    Ok(())
}

fn replay_delete(
    tx: &rusqlite::Transaction,
    target_table: &migr_core::model::Table,
    plan: &TableCopyPlan,
    entry: &JournalEntry,
) -> Result<()> {
    let Some(src_pk) = single_source_pk(entry) else {
        return Ok(());
    };
    let target_pk = if plan.map_identity {
        match identity::lookup(tx, &plan.target, src_pk)? {
            Some(pk) => pk,
            // The row never made it to the target; deleting it there is a no-op (§4.7).
            None => return Ok(()),
        }
    } else {
        src_pk
    };

    let pk_col = target_table.primary_key().and_then(|c| c.first()).cloned().unwrap_or_else(|| "rowid".to_string());
    tx.execute(&format!("DELETE FROM {} WHERE {} = ?1", plan.target, pk_col), rusqlite::params![target_pk])?;
    Ok(())
}
