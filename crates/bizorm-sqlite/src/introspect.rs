//! Reading the live SQLite schema.
//!
//! Columns, foreign keys and indexes come from the `pragma_*` table-valued
//! functions. CHECK constraints are only kept in the table's SQL text, so
//! they are recovered from `sqlite_master`.

use std::sync::OnceLock;

use bizorm_core::{Connection, OnDelete, Result, Row, Value};
use bizorm_schema::{ColumnSpec, ConstraintSpec, ForeignKeySpec, IndexSpec, Introspector, TableSpec};
use regex::Regex;

use crate::adapter::{INTERNAL_TABLES, SqliteAdapter};

fn check_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?i)CONSTRAINT\s+"?([A-Za-z0-9_]+)"?\s+CHECK\s*\("#).ok())
        .as_ref()
}

fn text(row: &Row, index: usize) -> String {
    match row.get(index) {
        Some(Value::Text(s)) => s.clone(),
        Some(Value::Int(i)) => i.to_string(),
        _ => String::new(),
    }
}

fn parse_on_delete(action: &str) -> OnDelete {
    match action.to_ascii_uppercase().as_str() {
        "CASCADE" => OnDelete::Cascade,
        "RESTRICT" | "NO ACTION" => OnDelete::Restrict,
        _ => OnDelete::SetNull,
    }
}

/// `CONSTRAINT "name" CHECK (...)` clauses of a CREATE TABLE statement.
fn check_constraints(create_sql: &str) -> Vec<ConstraintSpec> {
    let mut out = Vec::new();
    let Some(pattern) = check_pattern() else {
        return out;
    };
    for caps in pattern.captures_iter(create_sql) {
        let (Some(all), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        // the match ends just after the opening parenthesis
        let body_start = all.end();
        let mut depth = 1usize;
        let mut end = None;
        let mut in_quote = false;
        for (i, c) in create_sql[body_start..].char_indices() {
            match c {
                '\'' => in_quote = !in_quote,
                '(' if !in_quote => depth += 1,
                ')' if !in_quote => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        if let Some(end) = end {
            out.push(ConstraintSpec::new(
                name.as_str(),
                format!("CHECK ({})", &create_sql[body_start..end]),
            ));
        }
    }
    out
}

impl Introspector for SqliteAdapter {
    fn list_tables(&self, conn: &mut dyn Connection) -> Result<Vec<String>> {
        let rows = conn.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )?;
        Ok(rows
            .iter()
            .map(|r| text(r, 0))
            .filter(|name| !INTERNAL_TABLES.contains(&name.as_str()))
            .collect())
    }

    #[tracing::instrument(level = "trace", skip(self, conn))]
    fn table_info(&self, conn: &mut dyn Connection, table: &str) -> Result<Option<TableSpec>> {
        let name = Value::from(table);
        let master = conn.query(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            std::slice::from_ref(&name),
        )?;
        let Some(create_sql) = master.first().map(|r| text(r, 0)) else {
            return Ok(None);
        };

        let mut spec = TableSpec::new(table);
        let fks = conn.query(
            "SELECT \"from\", \"table\", on_delete FROM pragma_foreign_key_list(?1)",
            std::slice::from_ref(&name),
        )?;
        let columns = conn.query(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
            std::slice::from_ref(&name),
        )?;
        for row in &columns {
            let column_name = text(row, 0);
            let primary_key = row.get_i64(3).unwrap_or(0) > 0;
            let mut column = if primary_key {
                ColumnSpec::id(text(row, 1))
            } else {
                ColumnSpec::new(column_name.clone(), text(row, 1))
            };
            column.name = column_name.clone();
            if row.get_i64(2).unwrap_or(0) != 0 {
                column.nullable = false;
            }
            if let Some(fk) = fks.iter().find(|f| text(f, 0) == column_name) {
                column.foreign_key = Some(ForeignKeySpec {
                    table: text(fk, 1),
                    on_delete: parse_on_delete(&text(fk, 2)),
                });
            }
            spec.columns.push(column);
        }

        spec.constraints = check_constraints(&create_sql);

        let indexes = conn.query(
            "SELECT name, \"unique\" FROM pragma_index_list(?1) ORDER BY name",
            std::slice::from_ref(&name),
        )?;
        for row in &indexes {
            let index_name = text(row, 0);
            if index_name.starts_with("sqlite_autoindex") {
                continue;
            }
            let unique = row.get_i64(1).unwrap_or(0) != 0;
            let cols: Vec<String> = conn
                .query(
                    "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
                    &[Value::from(index_name.as_str())],
                )?
                .iter()
                .map(|r| text(r, 0))
                .collect();
            let index = IndexSpec {
                name: index_name,
                columns: cols,
                unique,
            };
            if index.unique && !index.is_managed() {
                // unique constraints are stored as unique indexes
                let quoted: Vec<String> = index.columns.iter().map(|c| format!("\"{}\"", c)).collect();
                spec.constraints.push(ConstraintSpec::new(
                    index.name,
                    format!("UNIQUE ({})", quoted.join(", ")),
                ));
            } else {
                spec.indexes.push(index);
            }
        }
        Ok(Some(spec))
    }
}
