//! Canonical in-memory Schema Model (C1): tables, columns, constraints, FKs,
//! views, indexes, triggers, and codegen annotations.
//!
//! The model is pure data. Nothing in this module touches SQLite; see
//! [`crate::introspect`] for the reader that populates it from a live
//! database and [`crate::hash`] for the canonical-form hash used to name and
//! identify a target schema.

use serde::{Deserialize, Serialize};

use crate::error::MigrError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SqlType {
    Integer,
    Text,
    Real,
    Timestamp,
    Blob,
}

impl SqlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Text => "TEXT",
            SqlType::Real => "REAL",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Blob => "BLOB",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, MigrError> {
        match s.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" => Ok(SqlType::Integer),
            "TEXT" | "VARCHAR" | "CHAR" | "CLOB" => Ok(SqlType::Text),
            "REAL" | "DOUBLE" | "FLOAT" => Ok(SqlType::Real),
            "TIMESTAMP" | "DATETIME" | "DATE" => Ok(SqlType::Timestamp),
            "BLOB" => Ok(SqlType::Blob),
            other => Err(MigrError::InvalidInput(format!("unknown sql type: {other}"))),
        }
    }

    /// True if `self` can receive a value of `source` without loss during
    /// copy (identical type, or the one documented widening conversion).
    pub fn compatible_with(&self, source: &SqlType) -> bool {
        self == source || (*self == SqlType::Real && *source == SqlType::Integer)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForeignKeyAction {
    NoAction,
    Cascade,
    SetNull,
    Restrict,
}

impl ForeignKeyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::Restrict => "RESTRICT",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, MigrError> {
        match s.to_ascii_uppercase().as_str() {
            "NO ACTION" => Ok(ForeignKeyAction::NoAction),
            "CASCADE" => Ok(ForeignKeyAction::Cascade),
            "SET NULL" => Ok(ForeignKeyAction::SetNull),
            "RESTRICT" => Ok(ForeignKeyAction::Restrict),
            other => Err(MigrError::InvalidInput(format!(
                "unknown foreign key action: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ColumnDefault {
    Literal(String),
    Expr(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Constraint {
    PrimaryKey { columns: Vec<String>, autoincrement: bool },
    Unique { columns: Vec<String> },
    ForeignKey(ForeignKey),
    Check { expr: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
}

/// Codegen-facing decorations. The engine round-trips these but never acts
/// on them; see `SPEC_FULL.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    QueryBy { columns: Vec<String> },
    QueryByOrCreate { columns: Vec<String> },
    InsertOrIgnore,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub constraints: Vec<Constraint>,
    pub annotations: Vec<Annotation>,
    /// Explicit `source -> target` column rename pairs carried alongside the
    /// declarative schema; consulted only by the Differ's rename inference
    /// (see `SPEC_FULL.md` §9, "Open question: rename hints").
    pub rename_hints: Vec<(String, String)>,
}

impl Table {
    pub fn primary_key(&self) -> Option<&[String]> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::PrimaryKey { columns, .. } => Some(columns.as_slice()),
            _ => None,
        })
    }

    /// True iff this table's identity can be remapped 1:1 during copy (see
    /// `SPEC_FULL.md` §9, "Open question: composite-PK identity mapping").
    pub fn has_single_integer_pk(&self) -> bool {
        match self.primary_key() {
            Some([only]) => self
                .columns
                .iter()
                .find(|c| &c.name == only)
                .map(|c| c.sql_type == SqlType::Integer)
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.constraints.iter().filter_map(|c| match c {
            Constraint::ForeignKey(fk) => Some(fk),
            _ => None,
        })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ViewBody {
    Literal(String),
    Join {
        base_table: String,
        joins: Vec<JoinSpec>,
        select_columns: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinSpec {
    pub table: String,
    pub on: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct View {
    pub name: String,
    pub body: ViewBody,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Index {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub name: String,
    pub table: String,
    pub body: String,
}

/// A complete target (or source) schema: the unit the Differ, Preflight
/// Planner, and Copy Planner all operate over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Schema {
    pub tables: Vec<Table>,
    pub views: Vec<View>,
    pub indexes: Vec<Index>,
    pub triggers: Vec<Trigger>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}
