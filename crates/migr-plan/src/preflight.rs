//! Preflight Planner (C4): classifies every diff atom as supported or
//! unsupported, checks non-table consistency, and produces the dry-run
//! report consumed by both `plan` and `migrate` (§4.3).

use std::collections::{HashSet, VecDeque};

use migr_core::hash::schema_hash;
use migr_core::model::{Constraint, Schema};

use crate::diff::{diff, ColumnStrategy};

#[derive(Debug, Clone, PartialEq)]
pub struct PreflightReport {
    pub supported: Vec<String>,
    pub unsupported: Vec<String>,
    pub copy_order: Vec<String>,
    pub schema_hash: String,
    /// Tables whose composite-PK parent makes identity mapping impossible;
    /// surfaced as a warning, not a rejection (§9 composite-PK note).
    pub composite_pk_warnings: Vec<String>,
}

impl PreflightReport {
    pub fn is_runnable(&self) -> bool {
        self.unsupported.is_empty()
    }
}

/// Run the full preflight check: diff `source` against `target`, classify
/// every atom, validate non-table consistency, and compute copy order.
pub fn preflight(source: &Schema, target: &Schema) -> PreflightReport {
    let d = diff(source, target);
    let mut supported = Vec::new();
    let mut unsupported = Vec::new();

    for name in &d.added_tables {
        supported.push(format!("add table {name}"));
    }
    for name in &d.removed_tables {
        supported.push(format!("remove table {name}"));
    }
    for (src, tgt) in &d.renamed_tables {
        supported.push(format!("rename table {src} -> {tgt}"));
    }
    for (src, tgt) in &d.ambiguous_pairs {
        unsupported.push(format!(
            "ambiguous add+remove pair {src} -> {tgt} (not inferable as rename, no hint supplied)"
        ));
    }

    for m in &d.matched_tables {
        if !m.incompatible_columns.is_empty() {
            unsupported.push(format!(
                "table {} has incompatible type change on column(s) {}",
                m.target_name,
                m.incompatible_columns.join(", ")
            ));
            continue;
        }
        if m.pk_changed {
            unsupported.push(format!("table {} has a primary key type or composition change", m.target_name));
            continue;
        }
        let mut bad_not_null = Vec::new();
        for mapping in &m.mappings {
            if matches!(mapping.strategy, ColumnStrategy::TypeDefault) {
                let tgt_table = target.table(&m.target_name).unwrap();
                let col = tgt_table.column(&mapping.target_column).unwrap();
                if !col.nullable {
                    bad_not_null.push(mapping.target_column.clone());
                }
            }
        }
        if !bad_not_null.is_empty() {
            unsupported.push(format!(
                "table {} adds NOT NULL column(s) {} with no default or nullable source",
                m.target_name,
                bad_not_null.join(", ")
            ));
            continue;
        }
        supported.push(format!("match table {}", m.target_name));
    }

    unsupported.extend(check_non_table_consistency(target));

    let composite_pk_warnings = composite_pk_children(target);

    let copy_order = match topo_order(target) {
        Ok(order) => order,
        Err(cyclic) => {
            unsupported.push(format!("foreign key graph contains a cycle among: {}", cyclic.join(", ")));
            Vec::new()
        }
    };

    unsupported.sort();
    unsupported.dedup();
    supported.sort();

    PreflightReport {
        supported,
        unsupported,
        copy_order,
        schema_hash: schema_hash(target),
        composite_pk_warnings,
    }
}

/// Validate invariants 1-5 of §3: FK/index/trigger targets exist, views
/// don't cycle, names are unique.
fn check_non_table_consistency(target: &Schema) -> Vec<String> {
    let mut problems = Vec::new();

    let mut seen_tables = HashSet::new();
    for t in &target.tables {
        if !seen_tables.insert(t.name.as_str()) {
            problems.push(format!("duplicate table name {}", t.name));
        }
    }

    for t in &target.tables {
        for fk in t.foreign_keys() {
            match target.table(&fk.ref_table) {
                None => problems.push(format!(
                    "table {} has a foreign key referencing missing table {}",
                    t.name, fk.ref_table
                )),
                Some(ref_table) => {
                    for col in &fk.ref_columns {
                        if ref_table.column(col).is_none() {
                            problems.push(format!(
                                "table {} foreign key references missing column {}.{}",
                                t.name, fk.ref_table, col
                            ));
                        }
                    }
                }
            }
        }
    }

    for idx in &target.indexes {
        match target.table(&idx.table) {
            None => problems.push(format!("index {} references missing table {}", idx.name, idx.table)),
            Some(table) => {
                for col in &idx.columns {
                    if table.column(col).is_none() {
                        problems.push(format!("index {} references missing column {}.{}", idx.name, idx.table, col));
                    }
                }
            }
        }
    }

    for trg in &target.triggers {
        if target.table(&trg.table).is_none() {
            problems.push(format!("trigger {} references missing table {}", trg.name, trg.table));
        }
    }

    if let Some(cycle) = find_view_cycle(target) {
        problems.push(format!("cyclic view dependency among: {}", cycle.join(", ")));
    }

    problems
}

fn find_view_cycle(target: &Schema) -> Option<Vec<String>> {
    use std::collections::HashMap;

    let deps: HashMap<&str, &[String]> = target
        .views
        .iter()
        .map(|v| (v.name.as_str(), v.depends_on.as_slice()))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack = Vec::new();

    fn visit<'a>(
        name: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(Mark::Done) = marks.get(name) {
            return None;
        }
        if let Some(Mark::Visiting) = marks.get(name) {
            return Some(stack.clone());
        }
        marks.insert(name, Mark::Visiting);
        stack.push(name.to_string());
        if let Some(children) = deps.get(name) {
            for child in children.iter() {
                if deps.contains_key(child.as_str()) {
                    if let Some(cycle) = visit(child.as_str(), deps, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        None
    }

    for name in deps.keys() {
        if let Some(cycle) = visit(name, &deps, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// Tables whose PK is not a single integer column, yet are referenced by a
/// child's FK — identity mapping cannot be offered for their children.
fn composite_pk_children(target: &Schema) -> Vec<String> {
    let mut warnings = Vec::new();
    for t in &target.tables {
        for fk in t.foreign_keys() {
            if let Some(parent) = target.table(&fk.ref_table) {
                if !parent.has_single_integer_pk() {
                    warnings.push(format!(
                        "table {} references composite/non-integer-PK parent {}; identity mapping unavailable",
                        t.name, fk.ref_table
                    ));
                }
            }
        }
    }
    warnings.sort();
    warnings.dedup();
    warnings
}

/// Kahn's topological sort over the FK graph (parents before children), ties
/// broken lexicographically for determinism (§4.4).
fn topo_order(target: &Schema) -> Result<Vec<String>, Vec<String>> {
    let mut indegree: std::collections::BTreeMap<&str, usize> =
        target.tables.iter().map(|t| (t.name.as_str(), 0)).collect();
    let mut edges: std::collections::BTreeMap<&str, Vec<&str>> =
        target.tables.iter().map(|t| (t.name.as_str(), Vec::new())).collect();

    for t in &target.tables {
        for fk in t.foreign_keys() {
            if fk.ref_table == t.name {
                continue; // self-reference does not block a topo order
            }
            if let Some(list) = edges.get_mut(fk.ref_table.as_str()) {
                list.push(t.name.as_str());
                *indegree.get_mut(t.name.as_str()).unwrap() += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    let mut queue_sorted: Vec<&str> = queue.drain(..).collect();
    queue_sorted.sort_unstable();
    let mut queue: VecDeque<&str> = queue_sorted.into();

    let mut order = Vec::new();
    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        let mut newly_free = Vec::new();
        if let Some(children) = edges.get(name) {
            for &child in children {
                let deg = indegree.get_mut(child).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_free.push(child);
                }
            }
        }
        newly_free.sort_unstable();
        for child in newly_free {
            queue.push_back(child);
        }
    }

    if order.len() == target.tables.len() {
        Ok(order)
    } else {
        let remaining: Vec<String> = indegree
            .into_iter()
            .filter(|(name, _)| !order.contains(&name.to_string()))
            .map(|(name, _)| name.to_string())
            .collect();
        Err(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migr_core::model::{Column, ForeignKey, ForeignKeyAction, SqlType, Table};

    fn int_col(name: &str) -> Column {
        Column { name: name.to_string(), sql_type: SqlType::Integer, nullable: false, default: None }
    }

    fn pk_table(name: &str, extra: Vec<Column>) -> Table {
        let mut columns = vec![int_col("id")];
        columns.extend(extra);
        Table {
            name: name.to_string(),
            columns,
            constraints: vec![Constraint::PrimaryKey { columns: vec!["id".into()], autoincrement: true }],
            annotations: vec![],
            rename_hints: vec![],
        }
    }

    #[test]
    fn idempotent_preflight_on_identical_schema() {
        let schema = Schema { tables: vec![pk_table("users", vec![])], ..Default::default() };
        let report = preflight(&schema, &schema);
        assert!(report.unsupported.is_empty());
        assert!(report.is_runnable());
    }

    #[test]
    fn incompatible_type_change_is_unsupported() {
        let source = Schema {
            tables: vec![pk_table("users", vec![Column { name: "n".into(), sql_type: SqlType::Integer, nullable: false, default: None }])],
            ..Default::default()
        };
        let target = Schema {
            tables: vec![pk_table("users", vec![Column { name: "n".into(), sql_type: SqlType::Text, nullable: false, default: None }])],
            ..Default::default()
        };
        let report = preflight(&source, &target);
        assert!(!report.is_runnable());
    }

    #[test]
    fn copy_order_respects_foreign_keys() {
        let mut orders = pk_table("orders", vec![Column { name: "user_id".into(), sql_type: SqlType::Integer, nullable: false, default: None }]);
        orders.constraints.push(Constraint::ForeignKey(ForeignKey {
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_columns: vec!["id".into()],
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }));
        let target = Schema { tables: vec![orders, pk_table("users", vec![])], ..Default::default() };
        let report = preflight(&Schema::default(), &target);
        assert_eq!(report.copy_order, vec!["users".to_string(), "orders".to_string()]);
    }

    #[test]
    fn fk_referencing_missing_table_is_unsupported() {
        let mut orders = pk_table("orders", vec![]);
        orders.constraints.push(Constraint::ForeignKey(ForeignKey {
            columns: vec!["id".into()],
            ref_table: "ghost".into(),
            ref_columns: vec!["id".into()],
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }));
        let target = Schema { tables: vec![orders], ..Default::default() };
        let report = preflight(&Schema::default(), &target);
        assert!(!report.is_runnable());
    }

    #[test]
    fn composite_pk_parent_is_warned_not_rejected() {
        let mut parent = pk_table("groups", vec![]);
        parent.constraints = vec![Constraint::PrimaryKey { columns: vec!["id".into(), "tenant".into()], autoincrement: false }];
        parent.columns.push(Column { name: "tenant".into(), sql_type: SqlType::Integer, nullable: false, default: None });

        let mut child = pk_table("members", vec![Column { name: "group_id".into(), sql_type: SqlType::Integer, nullable: false, default: None }]);
        child.constraints.push(Constraint::ForeignKey(ForeignKey {
            columns: vec!["group_id".into()],
            ref_table: "groups".into(),
            ref_columns: vec!["id".into()],
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }));

        let target = Schema { tables: vec![parent, child], ..Default::default() };
        let report = preflight(&Schema::default(), &target);
        assert!(report.is_runnable());
        assert!(!report.composite_pk_warnings.is_empty());
    }
}
