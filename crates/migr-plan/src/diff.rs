//! Differ (C3): computes added/removed/renamed tables and per-column
//! mappings between a source and a target [`Schema`] (§4.2).

use std::collections::BTreeSet;

use migr_core::model::{Column, ColumnDefault, Schema, SqlType, Table};

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnStrategy {
    SourceColumn(String),
    DefaultExpr(String),
    TypeDefault,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub target_column: String,
    pub strategy: ColumnStrategy,
}

/// Per-table column-level comparison result for a matched or renamed table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumnDiff {
    pub source_name: String,
    pub target_name: String,
    pub mappings: Vec<ColumnMapping>,
    /// Target columns whose source counterpart exists but has an
    /// incompatible type — renders the table unsupported (§4.3).
    pub incompatible_columns: Vec<String>,
    /// True if the primary key's type or column composition changed.
    pub pk_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    pub added_tables: Vec<String>,
    pub removed_tables: Vec<String>,
    /// `(source_name, target_name)` pairs.
    pub renamed_tables: Vec<(String, String)>,
    pub matched_tables: Vec<TableColumnDiff>,
    /// Add+remove pairs that look like candidate renames but were ambiguous
    /// (matched by more than one counterpart, or by none when a hint was
    /// expected) and therefore remain separate add+remove (§4.2).
    pub ambiguous_pairs: Vec<(String, String)>,
}

/// Compute the [`SchemaDiff`] between `source` and `target`, deterministically
/// ordered by lexicographic table name (§4.2).
pub fn diff(source: &Schema, target: &Schema) -> SchemaDiff {
    let source_names: BTreeSet<&str> = source.table_names().collect();
    let target_names: BTreeSet<&str> = target.table_names().collect();

    let mut removed: Vec<&str> = source_names.difference(&target_names).copied().collect();
    let mut added: Vec<&str> = target_names.difference(&source_names).copied().collect();
    removed.sort_unstable();
    added.sort_unstable();

    let matched_names: Vec<&str> = source_names.intersection(&target_names).copied().collect();

    let (renamed, ambiguous, remaining_removed, remaining_added) = infer_renames(source, target, &removed, &added);

    let mut matched_tables: Vec<TableColumnDiff> = matched_names
        .iter()
        .map(|name| column_diff(source.table(name).unwrap(), target.table(name).unwrap(), name))
        .collect();

    for (src_name, tgt_name) in &renamed {
        let src_table = source.table(src_name).unwrap();
        let tgt_table = target.table(tgt_name).unwrap();
        matched_tables.push(column_diff(src_table, tgt_table, tgt_name));
    }

    matched_tables.sort_by(|a, b| a.target_name.cmp(&b.target_name));

    SchemaDiff {
        added_tables: remaining_added.into_iter().map(String::from).collect(),
        removed_tables: remaining_removed.into_iter().map(String::from).collect(),
        renamed_tables: renamed,
        matched_tables,
        ambiguous_pairs: ambiguous,
    }
}

/// Apply the rename inference rule of §4.2: a removed table `R` and an added
/// table `A` are a rename iff their column sequences are the same length and
/// every pair matches by type/nullability/PK membership, and no other
/// candidate matches either side. A table-level rename hint on the target
/// short-circuits this for the named pair.
fn infer_renames<'a>(
    source: &Schema,
    target: &Schema,
    removed: &[&'a str],
    added: &[&'a str],
) -> (Vec<(String, String)>, Vec<(String, String)>, Vec<&'a str>, Vec<&'a str>) {
    let mut renamed = Vec::new();
    let mut ambiguous = Vec::new();
    let mut used_removed = BTreeSet::new();
    let mut used_added = BTreeSet::new();

    // Hinted renames take priority and never count as ambiguous.
    for &a in added {
        let tgt_table = target.table(a).unwrap();
        for (hint_src, hint_tgt) in &tgt_table.rename_hints {
            if hint_tgt == a && removed.contains(&hint_src.as_str()) && !used_removed.contains(hint_src.as_str()) {
                renamed.push((hint_src.clone(), a.to_string()));
                used_removed.insert(hint_src.as_str());
                used_added.insert(a);
            }
        }
    }

    for &r in removed {
        if used_removed.contains(r) {
            continue;
        }
        let src_table = source.table(r).unwrap();
        let candidates: Vec<&str> = added
            .iter()
            .copied()
            .filter(|&a| !used_added.contains(a) && shape_equivalent(src_table, target.table(a).unwrap()))
            .collect();

        match candidates.as_slice() {
            [only] => {
                // Also require the candidate has no other removed-side match.
                let reverse_candidates: Vec<&str> = removed
                    .iter()
                    .copied()
                    .filter(|&r2| !used_removed.contains(r2) && shape_equivalent(source.table(r2).unwrap(), target.table(only).unwrap()))
                    .collect();
                if reverse_candidates.len() == 1 {
                    renamed.push((r.to_string(), only.to_string()));
                    used_removed.insert(r);
                    used_added.insert(*only);
                } else {
                    ambiguous.push((r.to_string(), only.to_string()));
                }
            }
            [] => {}
            _ => {
                for c in candidates {
                    ambiguous.push((r.to_string(), c.to_string()));
                }
            }
        }
    }

    let remaining_removed: Vec<&str> = removed.iter().copied().filter(|r| !used_removed.contains(r)).collect();
    let remaining_added: Vec<&str> = added.iter().copied().filter(|a| !used_added.contains(a)).collect();

    (renamed, ambiguous, remaining_removed, remaining_added)
}

/// Two tables are shape-equivalent when their column sequences have the same
/// length and every positional pair matches by type, nullability, and PK
/// membership (names may differ) — §4.2.
fn shape_equivalent(a: &Table, b: &Table) -> bool {
    if a.columns.len() != b.columns.len() {
        return false;
    }
    let a_pk: BTreeSet<&str> = a.primary_key().unwrap_or(&[]).iter().map(String::as_str).collect();
    let b_pk: BTreeSet<&str> = b.primary_key().unwrap_or(&[]).iter().map(String::as_str).collect();
    if a_pk.len() != b_pk.len() {
        return false;
    }
    a.columns.iter().zip(b.columns.iter()).all(|(ac, bc)| {
        ac.sql_type == bc.sql_type
            && ac.nullable == bc.nullable
            && a_pk.contains(ac.name.as_str()) == b_pk.contains(bc.name.as_str())
    })
}

/// Column diff within a matched or renamed table pair (§4.2 strategy 1-5).
fn column_diff(source: &Table, target: &Table, target_name: &str) -> TableColumnDiff {
    let mut mappings = Vec::with_capacity(target.columns.len());
    let mut incompatible = Vec::new();

    let hinted: std::collections::HashMap<&str, &str> = target
        .rename_hints
        .iter()
        .map(|(s, t)| (t.as_str(), s.as_str()))
        .collect();

    for col in &target.columns {
        let strategy = if let Some(src_col) = source.column(&col.name) {
            if col.sql_type.compatible_with(&src_col.sql_type) {
                ColumnStrategy::SourceColumn(col.name.clone())
            } else {
                incompatible.push(col.name.clone());
                ColumnStrategy::TypeDefault
            }
        } else if let Some(&hint_src) = hinted.get(col.name.as_str()) {
            match source.column(hint_src) {
                Some(src_col) if col.sql_type.compatible_with(&src_col.sql_type) => {
                    ColumnStrategy::SourceColumn(hint_src.to_string())
                }
                Some(_) => {
                    incompatible.push(col.name.clone());
                    ColumnStrategy::TypeDefault
                }
                None => default_strategy(col),
            }
        } else {
            default_strategy(col)
        };
        mappings.push(ColumnMapping { target_column: col.name.clone(), strategy });
    }

    let pk_changed = source.primary_key().map(|c| c.to_vec()) != target.primary_key().map(|c| c.to_vec())
        || pk_type_changed(source, target);

    TableColumnDiff {
        source_name: source.name.clone(),
        target_name: target_name.to_string(),
        mappings,
        incompatible_columns: incompatible,
        pk_changed,
    }
}

fn pk_type_changed(source: &Table, target: &Table) -> bool {
    match (source.primary_key(), target.primary_key()) {
        (Some(s), Some(t)) if s.len() == t.len() => s.iter().zip(t.iter()).any(|(sc, tc)| {
            let s_type = source.column(sc).map(|c| c.sql_type);
            let t_type = target.column(tc).map(|c| c.sql_type);
            s_type != t_type
        }),
        _ => false,
    }
}

fn default_strategy(col: &Column) -> ColumnStrategy {
    match &col.default {
        Some(ColumnDefault::Literal(v)) => ColumnStrategy::DefaultExpr(v.clone()),
        Some(ColumnDefault::Expr(e)) => ColumnStrategy::DefaultExpr(e.clone()),
        None if col.nullable => ColumnStrategy::DefaultExpr("NULL".to_string()),
        None => match col.sql_type {
            SqlType::Integer => ColumnStrategy::TypeDefault,
            SqlType::Text => ColumnStrategy::TypeDefault,
            SqlType::Real => ColumnStrategy::TypeDefault,
            SqlType::Timestamp => ColumnStrategy::TypeDefault,
            SqlType::Blob => ColumnStrategy::TypeDefault,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migr_core::model::{Column, Constraint, SqlType, Table};

    fn table(name: &str, columns: Vec<Column>, pk: &[&str]) -> Table {
        Table {
            name: name.to_string(),
            columns,
            constraints: if pk.is_empty() {
                vec![]
            } else {
                vec![Constraint::PrimaryKey {
                    columns: pk.iter().map(|s| s.to_string()).collect(),
                    autoincrement: true,
                }]
            },
            annotations: vec![],
            rename_hints: vec![],
        }
    }

    fn col(name: &str, ty: SqlType, nullable: bool) -> Column {
        Column { name: name.to_string(), sql_type: ty, nullable, default: None }
    }

    #[test]
    fn added_and_removed_tables() {
        let source = Schema {
            tables: vec![table("users", vec![col("id", SqlType::Integer, false)], &["id"])],
            ..Default::default()
        };
        let target = Schema {
            tables: vec![table("orders", vec![col("id", SqlType::Integer, false)], &["id"])],
            ..Default::default()
        };
        let d = diff(&source, &target);
        assert_eq!(d.added_tables, vec!["orders".to_string()]);
        assert_eq!(d.removed_tables, vec!["users".to_string()]);
        assert!(d.renamed_tables.is_empty());
    }

    #[test]
    fn unambiguous_rename_is_inferred() {
        let source = Schema {
            tables: vec![table(
                "clients",
                vec![col("id", SqlType::Integer, false), col("full_name", SqlType::Text, false)],
                &["id"],
            )],
            ..Default::default()
        };
        let target = Schema {
            tables: vec![table(
                "customers",
                vec![col("id", SqlType::Integer, false), col("full_name", SqlType::Text, false)],
                &["id"],
            )],
            ..Default::default()
        };
        let d = diff(&source, &target);
        assert_eq!(d.renamed_tables, vec![("clients".to_string(), "customers".to_string())]);
        assert!(d.added_tables.is_empty());
        assert!(d.removed_tables.is_empty());
    }

    #[test]
    fn ambiguous_rename_stays_add_and_remove() {
        let source = Schema {
            tables: vec![
                table("a", vec![col("id", SqlType::Integer, false), col("x", SqlType::Text, false)], &["id"]),
                table("b", vec![col("id", SqlType::Integer, false), col("x", SqlType::Text, false)], &["id"]),
            ],
            ..Default::default()
        };
        let target = Schema {
            tables: vec![table(
                "c",
                vec![col("id", SqlType::Integer, false), col("x", SqlType::Text, false)],
                &["id"],
            )],
            ..Default::default()
        };
        let d = diff(&source, &target);
        assert!(d.renamed_tables.is_empty());
        assert!(!d.ambiguous_pairs.is_empty());
    }

    #[test]
    fn rename_hint_disambiguates() {
        let source = Schema {
            tables: vec![table(
                "legacy_users",
                vec![col("id", SqlType::Integer, false), col("full_name", SqlType::Text, false)],
                &["id"],
            )],
            ..Default::default()
        };
        let mut renamed_target = table(
            "people",
            vec![col("id", SqlType::Integer, false), col("full_name", SqlType::Text, false)],
            &["id"],
        );
        renamed_target.rename_hints.push(("legacy_users".to_string(), "people".to_string()));
        let target = Schema { tables: vec![renamed_target], ..Default::default() };
        let d = diff(&source, &target);
        assert_eq!(d.renamed_tables, vec![("legacy_users".to_string(), "people".to_string())]);
    }

    #[test]
    fn matched_table_source_column_strategy() {
        let source = Schema {
            tables: vec![table(
                "items",
                vec![col("id", SqlType::Integer, false), col("qty", SqlType::Integer, false)],
                &["id"],
            )],
            ..Default::default()
        };
        let target = Schema {
            tables: vec![table(
                "items",
                vec![col("id", SqlType::Integer, false), col("qty", SqlType::Integer, false)],
                &["id"],
            )],
            ..Default::default()
        };
        let d = diff(&source, &target);
        assert_eq!(d.matched_tables.len(), 1);
        let m = &d.matched_tables[0];
        assert!(m.mappings.iter().all(|m| matches!(m.strategy, ColumnStrategy::SourceColumn(_))));
        assert!(m.incompatible_columns.is_empty());
        assert!(!m.pk_changed);
    }

    #[test]
    fn added_column_with_default() {
        let source = Schema {
            tables: vec![table("items", vec![col("id", SqlType::Integer, false)], &["id"])],
            ..Default::default()
        };
        let mut target_table = table("items", vec![col("id", SqlType::Integer, false)], &["id"]);
        target_table.columns.push(Column {
            name: "label".into(),
            sql_type: SqlType::Text,
            nullable: false,
            default: Some(ColumnDefault::Literal("n/a".into())),
        });
        let target = Schema { tables: vec![target_table], ..Default::default() };
        let d = diff(&source, &target);
        let m = &d.matched_tables[0];
        let label = m.mappings.iter().find(|c| c.target_column == "label").unwrap();
        assert_eq!(label.strategy, ColumnStrategy::DefaultExpr("n/a".to_string()));
    }

    #[test]
    fn incompatible_type_change_is_flagged() {
        let source = Schema {
            tables: vec![table("users", vec![col("id", SqlType::Integer, false)], &["id"])],
            ..Default::default()
        };
        let target = Schema {
            tables: vec![table("users", vec![col("id", SqlType::Text, false)], &["id"])],
            ..Default::default()
        };
        let d = diff(&source, &target);
        let m = &d.matched_tables[0];
        assert_eq!(m.incompatible_columns, vec!["id".to_string()]);
        assert!(m.pk_changed);
    }

    #[test]
    fn widening_integer_to_real_is_compatible() {
        let source = Schema {
            tables: vec![table("t", vec![col("id", SqlType::Integer, false), col("n", SqlType::Integer, false)], &["id"])],
            ..Default::default()
        };
        let target = Schema {
            tables: vec![table("t", vec![col("id", SqlType::Integer, false), col("n", SqlType::Real, false)], &["id"])],
            ..Default::default()
        };
        let d = diff(&source, &target);
        assert!(d.matched_tables[0].incompatible_columns.is_empty());
    }

    #[test]
    fn preflight_idempotence_same_schema() {
        let schema = Schema {
            tables: vec![table(
                "t",
                vec![col("id", SqlType::Integer, false), col("n", SqlType::Text, true)],
                &["id"],
            )],
            ..Default::default()
        };
        let d = diff(&schema, &schema);
        assert!(d.added_tables.is_empty());
        assert!(d.removed_tables.is_empty());
        assert!(d.renamed_tables.is_empty());
        assert_eq!(d.matched_tables.len(), 1);
        assert!(d.matched_tables[0].incompatible_columns.is_empty());
    }
}
