//! Renders a [`Schema`] into `CREATE TABLE IF NOT EXISTS` DDL, the inverse of
//! [`crate::introspect`]. Used by the Migration Controller to materialize a
//! brand-new DB file for the target schema (§4.8), in the same
//! `CREATE ... IF NOT EXISTS` idiom this workspace already uses for its own
//! metadata tables.

use crate::model::{Column, Constraint, ForeignKey, Schema, SqlType, Table, View, ViewBody};

/// Render every table, view, index, and trigger in `schema` as one DDL batch
/// suitable for `Connection::execute_batch`.
pub fn render_schema(schema: &Schema) -> String {
    let mut out = String::new();
    for table in &schema.tables {
        out.push_str(&render_table(table));
        out.push('\n');
    }
    for view in &schema.views {
        out.push_str(&render_view(view));
        out.push('\n');
    }
    for index in &schema.indexes {
        out.push_str(&format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});\n",
            if index.unique { "UNIQUE " } else { "" },
            index.name,
            index.table,
            index.columns.join(", "),
        ));
    }
    for trigger in &schema.triggers {
        out.push_str(&trigger.body);
        out.push('\n');
    }
    out
}

fn render_table(table: &Table) -> String {
    let mut lines: Vec<String> = table.columns.iter().map(render_column).collect();
    for constraint in &table.constraints {
        if let Some(line) = render_table_constraint(constraint) {
            lines.push(line);
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);\n",
        table.name,
        lines.join(",\n    ")
    )
}

fn render_column(col: &Column) -> String {
    let mut s = format!("{} {}", col.name, sql_type_ddl(col.sql_type));
    if !col.nullable {
        s.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default {
        match default {
            crate::model::ColumnDefault::Literal(v) => s.push_str(&format!(" DEFAULT '{v}'")),
            crate::model::ColumnDefault::Expr(e) => s.push_str(&format!(" DEFAULT {e}")),
        }
    }
    s
}

fn sql_type_ddl(ty: SqlType) -> &'static str {
    ty.as_str()
}

fn render_table_constraint(constraint: &Constraint) -> Option<String> {
    match constraint {
        Constraint::PrimaryKey { columns, autoincrement } => {
            let suffix = if *autoincrement && columns.len() == 1 { " AUTOINCREMENT" } else { "" };
            Some(format!("PRIMARY KEY ({}){}", columns.join(", "), suffix))
        }
        Constraint::Unique { columns } => Some(format!("UNIQUE ({})", columns.join(", "))),
        Constraint::ForeignKey(ForeignKey { columns, ref_table, ref_columns, on_delete, on_update }) => {
            Some(format!(
                "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE {} ON UPDATE {}",
                columns.join(", "),
                ref_table,
                ref_columns.join(", "),
                on_delete.as_str(),
                on_update.as_str(),
            ))
        }
        Constraint::Check { expr } => Some(format!("CHECK ({expr})")),
    }
}

fn render_view(view: &View) -> String {
    match &view.body {
        ViewBody::Literal(sql) => {
            if sql.trim_start().to_ascii_uppercase().starts_with("CREATE") {
                format!("{sql};\n")
            } else {
                format!("CREATE VIEW IF NOT EXISTS {} AS {sql};\n", view.name)
            }
        }
        ViewBody::Join { base_table, joins, select_columns } => {
            let mut sql = format!("CREATE VIEW IF NOT EXISTS {} AS SELECT {} FROM {}", view.name, select_columns.join(", "), base_table);
            for join in joins {
                sql.push_str(&format!(" JOIN {} ON {}", join.table, join.on));
            }
            sql.push(';');
            sql
        }
    }
}
