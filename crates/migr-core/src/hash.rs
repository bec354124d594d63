//! Canonical schema hashing.
//!
//! The hash is computed over a normalized textual rendering of a [`Schema`]
//! so that two structurally identical schemas hash identically regardless of
//! declaration order. It is used to name the deterministic new-DB file and is
//! persisted in `_schema_identity`.

use sha2::{Digest, Sha256};

use crate::model::{Column, Constraint, ForeignKey, Schema, Table};

/// Generic SHA256 helper — returns a lowercase hex-encoded digest.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical-form SHA-256 of `schema`, excluding annotation payload (§4.3).
///
/// Tables, columns, and constraints are sorted into a normalized order before
/// rendering, so the hash is insensitive to declaration order but sensitive
/// to every structural property of the schema.
pub fn schema_hash(schema: &Schema) -> String {
    sha256_hex(&canonical_form(schema))
}

/// First 16 hex characters of [`schema_hash`], used in deterministic DB
/// filenames (§6).
pub fn schema_hash_short(schema: &Schema) -> String {
    schema_hash(schema)[..16].to_string()
}

fn canonical_form(schema: &Schema) -> String {
    let mut tables: Vec<&Table> = schema.tables.iter().collect();
    tables.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = String::new();
    for table in tables {
        out.push_str("TABLE ");
        out.push_str(&table.name);
        out.push('\n');

        let mut columns: Vec<&Column> = table.columns.iter().collect();
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        for col in columns {
            out.push_str("  COL ");
            out.push_str(&col.name);
            out.push(' ');
            out.push_str(col.sql_type.as_str());
            out.push(' ');
            out.push_str(if col.nullable { "NULL" } else { "NOT NULL" });
            out.push('\n');
        }

        let mut constraints: Vec<String> = table
            .constraints
            .iter()
            .map(canonical_constraint)
            .collect();
        constraints.sort();
        for c in constraints {
            out.push_str("  CONSTRAINT ");
            out.push_str(&c);
            out.push('\n');
        }
    }

    let mut views: Vec<&str> = schema.views.iter().map(|v| v.name.as_str()).collect();
    views.sort_unstable();
    for name in views {
        out.push_str("VIEW ");
        out.push_str(name);
        out.push('\n');
    }

    let mut indexes: Vec<String> = schema
        .indexes
        .iter()
        .map(|i| format!("{} ON {} ({}){}", i.name, i.table, i.columns.join(","), if i.unique { " UNIQUE" } else { "" }))
        .collect();
    indexes.sort();
    for i in indexes {
        out.push_str("INDEX ");
        out.push_str(&i);
        out.push('\n');
    }

    let mut triggers: Vec<&str> = schema.triggers.iter().map(|t| t.name.as_str()).collect();
    triggers.sort_unstable();
    for name in triggers {
        out.push_str("TRIGGER ");
        out.push_str(name);
        out.push('\n');
    }

    out
}

fn canonical_constraint(c: &Constraint) -> String {
    match c {
        Constraint::PrimaryKey { columns, autoincrement } => {
            format!("PK({}){}", columns.join(","), if *autoincrement { " AUTOINCREMENT" } else { "" })
        }
        Constraint::Unique { columns } => format!("UNIQUE({})", columns.join(",")),
        Constraint::ForeignKey(ForeignKey {
            columns,
            ref_table,
            ref_columns,
            on_delete,
            on_update,
        }) => format!(
            "FK({})->{}({}) ON DELETE {} ON UPDATE {}",
            columns.join(","),
            ref_table,
            ref_columns.join(","),
            on_delete.as_str(),
            on_update.as_str(),
        ),
        Constraint::Check { expr } => format!("CHECK({expr})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, SqlType};

    fn users_table() -> Table {
        Table {
            name: "users".into(),
            columns: vec![Column {
                name: "id".into(),
                sql_type: SqlType::Integer,
                nullable: false,
                default: None,
            }],
            constraints: vec![Constraint::PrimaryKey {
                columns: vec!["id".into()],
                autoincrement: true,
            }],
            annotations: vec![],
            rename_hints: vec![],
        }
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn schema_hash_is_order_insensitive() {
        let a = Schema {
            tables: vec![users_table(), Table { name: "orders".into(), ..users_table() }],
            ..Default::default()
        };
        let b = Schema {
            tables: vec![Table { name: "orders".into(), ..users_table() }, users_table()],
            ..Default::default()
        };
        assert_eq!(schema_hash(&a), schema_hash(&b));
    }

    #[test]
    fn schema_hash_differs_on_structural_change() {
        let a = Schema { tables: vec![users_table()], ..Default::default() };
        let mut changed = users_table();
        changed.columns.push(Column {
            name: "email".into(),
            sql_type: SqlType::Text,
            nullable: true,
            default: None,
        });
        let b = Schema { tables: vec![changed], ..Default::default() };
        assert_ne!(schema_hash(&a), schema_hash(&b));
    }

    #[test]
    fn schema_hash_ignores_annotations_and_rename_hints() {
        let a = Schema { tables: vec![users_table()], ..Default::default() };
        let mut decorated = users_table();
        decorated.annotations.push(crate::model::Annotation::InsertOrIgnore);
        decorated.rename_hints.push(("old_id".into(), "id".into()));
        let b = Schema { tables: vec![decorated], ..Default::default() };
        assert_eq!(schema_hash(&a), schema_hash(&b));
    }

    #[test]
    fn schema_hash_short_is_16_chars() {
        let schema = Schema { tables: vec![users_table()], ..Default::default() };
        assert_eq!(schema_hash_short(&schema).len(), 16);
    }
}
