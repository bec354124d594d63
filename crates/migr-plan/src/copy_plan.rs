//! Copy Planner (C5): attaches a concrete per-table copy plan to the
//! Preflight Planner's FK-ordered table list (§4.4).

use migr_core::model::Schema;

use crate::diff::{diff, ColumnMapping, ColumnStrategy};
use crate::preflight::PreflightReport;

#[derive(Debug, Clone, PartialEq)]
pub struct TableCopyPlan {
    pub target: String,
    /// `None` for a target table with no source counterpart (a pure add);
    /// every column then uses a default strategy.
    pub source: Option<String>,
    pub column_plan: Vec<ColumnMapping>,
    /// True iff the target's PK is a single integer column and therefore
    /// eligible for `_id_mapping` (§9 composite-PK note).
    pub map_identity: bool,
}

/// Build the ordered copy plan from a preflight report that has already
/// confirmed `source`/`target` are runnable. Panics are not possible here:
/// callers must check `report.is_runnable()` first.
pub fn build_copy_plan(source: &Schema, target: &Schema, report: &PreflightReport) -> Vec<TableCopyPlan> {
    let d = diff(source, target);

    let mut rename_of: std::collections::HashMap<&str, &str> =
        d.renamed_tables.iter().map(|(s, t)| (t.as_str(), s.as_str())).collect();

    let matched_columns: std::collections::HashMap<&str, &Vec<ColumnMapping>> =
        d.matched_tables.iter().map(|m| (m.target_name.as_str(), &m.mappings)).collect();

    report
        .copy_order
        .iter()
        .map(|name| {
            let tgt_table = target.table(name).unwrap();
            let map_identity = tgt_table.has_single_integer_pk();

            if let Some(mappings) = matched_columns.get(name.as_str()) {
                let source_name = rename_of.remove(name.as_str()).unwrap_or(name.as_str());
                TableCopyPlan {
                    target: name.clone(),
                    source: Some(source_name.to_string()),
                    column_plan: (*mappings).clone(),
                    map_identity,
                }
            } else {
                // Pure add: every column falls back to its default strategy
                // since there is no source row shape to copy from.
                let column_plan = tgt_table
                    .columns
                    .iter()
                    .map(|c| ColumnMapping { target_column: c.name.clone(), strategy: default_only(c) })
                    .collect();
                TableCopyPlan { target: name.clone(), source: None, column_plan, map_identity }
            }
        })
        .collect()
}

fn default_only(col: &migr_core::model::Column) -> ColumnStrategy {
    match &col.default {
        Some(migr_core::model::ColumnDefault::Literal(v)) => ColumnStrategy::DefaultExpr(v.clone()),
        Some(migr_core::model::ColumnDefault::Expr(e)) => ColumnStrategy::DefaultExpr(e.clone()),
        None if col.nullable => ColumnStrategy::DefaultExpr("NULL".to_string()),
        None => ColumnStrategy::TypeDefault,
    }
}
