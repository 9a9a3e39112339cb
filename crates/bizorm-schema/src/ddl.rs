//! DDL generation contract and dialect-neutral statement helpers.

use bizorm_core::Dialect;

use crate::diff::SchemaOperation;
use crate::spec::{ColumnSpec, IndexSpec, TableSpec};

/// Turns schema operations into SQL statements for one database.
pub trait DdlGenerator {
    fn dialect_name(&self) -> &'static str;

    /// Statements performing `op`, in order.
    ///
    /// An empty list means the dialect cannot perform the operation; the
    /// generator logs why and the synchronizer moves on.
    fn generate(&self, op: &SchemaOperation) -> Vec<String>;

    fn generate_all(&self, ops: &[SchemaOperation]) -> Vec<String> {
        ops.iter().flat_map(|op| self.generate(op)).collect()
    }
}

/// `"name" TYPE [PRIMARY KEY] [NOT NULL] [REFERENCES ...]`.
pub fn column_definition(column: &ColumnSpec, dialect: &dyn Dialect) -> String {
    let mut sql = format!(
        "{} {}",
        dialect.quote_identifier(&column.name),
        column.sql_type
    );
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
    } else if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(fk) = &column.foreign_key {
        sql.push_str(&format!(
            " REFERENCES {} ({}) ON DELETE {}",
            dialect.quote_identifier(&fk.table),
            dialect.quote_identifier("id"),
            fk.on_delete.as_sql()
        ));
    }
    sql
}

/// CREATE TABLE with columns and named constraints. Indexes are separate
/// statements (see [`create_index`]).
pub fn create_table(table: &TableSpec, dialect: &dyn Dialect, if_not_exists: bool) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_definition(c, dialect))
        .collect();
    for constraint in &table.constraints {
        parts.push(format!(
            "CONSTRAINT {} {}",
            dialect.quote_identifier(&constraint.name),
            constraint.definition
        ));
    }
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        dialect.quote_identifier(&table.name),
        parts.join(", ")
    )
}

pub fn add_column(table: &str, column: &ColumnSpec, dialect: &dyn Dialect) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote_identifier(table),
        column_definition(column, dialect)
    )
}

pub fn create_index(table: &str, index: &IndexSpec, dialect: &dyn Dialect) -> String {
    let columns: Vec<String> = index
        .columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        dialect.quote_identifier(&index.name),
        dialect.quote_identifier(table),
        columns.join(", ")
    )
}

pub fn drop_index(name: &str, dialect: &dyn Dialect) -> String {
    format!("DROP INDEX IF EXISTS {}", dialect.quote_identifier(name))
}
