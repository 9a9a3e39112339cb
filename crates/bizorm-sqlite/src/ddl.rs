//! SQLite DDL generation.
//!
//! SQLite can add columns but cannot alter or drop them, nor add or drop
//! CHECK constraints. Those operations rebuild the table: a new table is
//! created with the changed layout, rows are copied, the old table is
//! dropped and the new one renamed into place. The new table is the one
//! renamed so that foreign keys of other tables, which name the original
//! table, stay valid.
//!
//! UNIQUE constraints are implemented as named unique indexes so they can
//! be added and dropped without a rebuild.

use bizorm_core::Dialect;
use bizorm_schema::ddl::{self, DdlGenerator};
use bizorm_schema::{ConstraintSpec, IndexSpec, SchemaOperation, TableSpec};

use crate::adapter::SqliteAdapter;

impl DdlGenerator for SqliteAdapter {
    fn dialect_name(&self) -> &'static str {
        "sqlite"
    }

    fn generate(&self, op: &SchemaOperation) -> Vec<String> {
        tracing::debug!(dialect = "sqlite", op = %op.describe(), "Generating DDL");
        let d = self.as_sqlite();

        match op {
            SchemaOperation::CreateTable(table) => {
                let mut base = table.clone();
                base.constraints.retain(|c| !c.is_unique());
                let mut stmts = vec![ddl::create_table(&base, d, false)];
                stmts.extend(index_statements(table, d));
                stmts
            }
            SchemaOperation::AddColumn { table, column } => {
                vec![ddl::add_column(table, column, d)]
            }
            SchemaOperation::DropColumn {
                table,
                column,
                table_info,
            } => self.with_info(table, table_info, |info| {
                let mut new = info.clone();
                new.columns.retain(|c| c.name != *column);
                new.indexes.retain(|i| !i.columns.contains(column));
                new.constraints
                    .retain(|c| !c.unique_columns().contains(column));
                if new.columns.is_empty() {
                    return Vec::new();
                }
                self.rebuild(&new, &[])
            }),
            SchemaOperation::AlterColumnType {
                table,
                column,
                table_info,
                ..
            } => self.with_info(table, table_info, |info| {
                let mut new = info.clone();
                for c in &mut new.columns {
                    if c.name == column.name {
                        c.sql_type = column.sql_type.clone();
                    }
                }
                self.rebuild(&new, &[(column.name.as_str(), column.sql_type.as_str())])
            }),
            SchemaOperation::AlterColumnNullable {
                table,
                column,
                table_info,
            } => self.with_info(table, table_info, |info| {
                let mut new = info.clone();
                for c in &mut new.columns {
                    if c.name == column.name {
                        c.nullable = column.nullable;
                    }
                }
                self.rebuild(&new, &[])
            }),
            SchemaOperation::AddConstraint {
                table,
                constraint,
                table_info,
            } => {
                if constraint.is_unique() {
                    return vec![unique_index(table, constraint, d)];
                }
                self.with_info(table, table_info, |info| {
                    let mut new = info.clone();
                    new.constraints.push(constraint.clone());
                    self.rebuild(&new, &[])
                })
            }
            SchemaOperation::DropConstraint {
                table,
                name,
                table_info,
            } => {
                let check = table_info
                    .as_ref()
                    .and_then(|t| t.get_constraint(name))
                    .is_some_and(|c| !c.is_unique());
                if !check {
                    return vec![ddl::drop_index(name, d)];
                }
                self.with_info(table, table_info, |info| {
                    let mut new = info.clone();
                    new.constraints.retain(|c| c.name != *name);
                    self.rebuild(&new, &[])
                })
            }
            SchemaOperation::CreateIndex { table, index } => {
                vec![ddl::create_index(table, index, d)]
            }
            SchemaOperation::DropIndex { name, .. } => vec![ddl::drop_index(name, d)],
        }
    }
}

impl SqliteAdapter {
    fn as_sqlite(&self) -> &dyn Dialect {
        bizorm_schema::Adapter::as_dialect(self)
    }

    fn with_info(
        &self,
        table: &str,
        info: &Option<TableSpec>,
        build: impl FnOnce(&TableSpec) -> Vec<String>,
    ) -> Vec<String> {
        match info {
            Some(info) => build(info),
            None => {
                tracing::warn!(table, "SQLite table rebuild needs the current table layout");
                Vec::new()
            }
        }
    }

    /// Statements rebuilding `new.name` with the layout of `new`.
    ///
    /// `casts` lists columns whose values are converted to a new type while
    /// copying.
    fn rebuild(&self, new: &TableSpec, casts: &[(&str, &str)]) -> Vec<String> {
        let d = self.as_sqlite();
        let temp = TableSpec {
            name: format!("__bizorm_new_{}", sanitize(&new.name)),
            columns: new.columns.clone(),
            constraints: new
                .constraints
                .iter()
                .filter(|c| !c.is_unique())
                .cloned()
                .collect(),
            indexes: Vec::new(),
        };

        let columns: Vec<String> = new
            .columns
            .iter()
            .map(|c| d.quote_identifier(&c.name))
            .collect();
        let exprs: Vec<String> = new
            .columns
            .iter()
            .map(|c| {
                let quoted = d.quote_identifier(&c.name);
                match casts.iter().find(|(name, _)| *name == c.name) {
                    Some((_, sql_type)) => format!("CAST({} AS {})", quoted, sql_type),
                    None => quoted,
                }
            })
            .collect();

        let mut stmts = vec![
            "PRAGMA foreign_keys=OFF".to_string(),
            "BEGIN".to_string(),
            ddl::create_table(&temp, d, false),
            format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                d.quote_identifier(&temp.name),
                columns.join(", "),
                exprs.join(", "),
                d.quote_identifier(&new.name)
            ),
            format!("DROP TABLE {}", d.quote_identifier(&new.name)),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                d.quote_identifier(&temp.name),
                d.quote_identifier(&new.name)
            ),
        ];
        stmts.extend(index_statements(new, d));
        stmts.push("COMMIT".to_string());
        if self.foreign_keys {
            stmts.push("PRAGMA foreign_keys=ON".to_string());
        }
        stmts
    }
}

/// Indexes of `table`, unique constraints included.
fn index_statements(table: &TableSpec, d: &dyn Dialect) -> Vec<String> {
    let mut stmts: Vec<String> = table
        .constraints
        .iter()
        .filter(|c| c.is_unique())
        .map(|c| unique_index(&table.name, c, d))
        .collect();
    stmts.extend(table.indexes.iter().map(|i| ddl::create_index(&table.name, i, d)));
    stmts
}

fn unique_index(table: &str, constraint: &ConstraintSpec, d: &dyn Dialect) -> String {
    let index = IndexSpec {
        name: constraint.name.clone(),
        columns: constraint.unique_columns(),
        unique: true,
    };
    ddl::create_index(table, &index, d)
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizorm_core::OnDelete;
    use bizorm_schema::ColumnSpec;

    fn post() -> TableSpec {
        TableSpec::new("post")
            .column(ColumnSpec::id("INTEGER"))
            .column(ColumnSpec::new("title", "VARCHAR(80)").not_null())
            .column(ColumnSpec::new("user_id", "INTEGER").references("user", OnDelete::Cascade))
            .column(ColumnSpec::new("legacy", "TEXT"))
            .constraint(ConstraintSpec::new("post_title_uniq", "UNIQUE (title)"))
            .constraint(ConstraintSpec::new("post_title_check", "CHECK (title != '')"))
            .index(IndexSpec::for_column("post", "user_id"))
            .index(IndexSpec::for_column("post", "legacy"))
    }

    #[test]
    fn test_create_table_emits_unique_indexes() {
        let stmts = SqliteAdapter::new().generate(&SchemaOperation::CreateTable(post()));
        assert_eq!(stmts.len(), 4);
        assert!(stmts[0].starts_with("CREATE TABLE \"post\""));
        assert!(stmts[0].contains("CONSTRAINT \"post_title_check\" CHECK"));
        assert!(!stmts[0].contains("UNIQUE"));
        assert_eq!(
            stmts[1],
            "CREATE UNIQUE INDEX IF NOT EXISTS \"post_title_uniq\" ON \"post\" (\"title\")"
        );
        assert!(stmts[2].contains("\"post_user_id_index\""));
    }

    #[test]
    fn test_drop_column_rebuilds_table() {
        let op = SchemaOperation::DropColumn {
            table: "post".into(),
            column: "legacy".into(),
            table_info: Some(post()),
        };
        let stmts = SqliteAdapter::new().generate(&op);
        assert_eq!(stmts[0], "PRAGMA foreign_keys=OFF");
        assert_eq!(stmts[1], "BEGIN");
        assert!(stmts[2].starts_with("CREATE TABLE \"__bizorm_new_post\""));
        assert!(!stmts[2].contains("legacy"));
        assert_eq!(
            stmts[3],
            "INSERT INTO \"__bizorm_new_post\" (\"id\", \"title\", \"user_id\") \
             SELECT \"id\", \"title\", \"user_id\" FROM \"post\""
        );
        assert_eq!(stmts[4], "DROP TABLE \"post\"");
        assert_eq!(stmts[5], "ALTER TABLE \"__bizorm_new_post\" RENAME TO \"post\"");
        assert!(stmts.iter().any(|s| s.contains("post_user_id_index")));
        assert!(!stmts.iter().any(|s| s.contains("post_legacy_index")));
        assert_eq!(stmts[stmts.len() - 2], "COMMIT");
        assert_eq!(stmts[stmts.len() - 1], "PRAGMA foreign_keys=ON");
    }

    #[test]
    fn test_alter_type_casts_values() {
        let op = SchemaOperation::AlterColumnType {
            table: "post".into(),
            column: ColumnSpec::new("legacy", "INTEGER"),
            from_type: "TEXT".into(),
            table_info: Some(post()),
        };
        let stmts = SqliteAdapter::new().generate(&op);
        assert!(stmts.iter().any(|s| s.contains("CAST(\"legacy\" AS INTEGER)")));
        assert!(stmts[2].contains("\"legacy\" INTEGER"));
    }

    #[test]
    fn test_unique_constraints_use_indexes() {
        let adapter = SqliteAdapter::new();
        let add = SchemaOperation::AddConstraint {
            table: "post".into(),
            constraint: ConstraintSpec::new("post_pair_uniq", "UNIQUE (title, user_id)"),
            table_info: None,
        };
        assert_eq!(
            adapter.generate(&add),
            vec![
                "CREATE UNIQUE INDEX IF NOT EXISTS \"post_pair_uniq\" ON \"post\" (\"title\", \"user_id\")"
            ]
        );
        let drop = SchemaOperation::DropConstraint {
            table: "post".into(),
            name: "post_title_uniq".into(),
            table_info: Some(post()),
        };
        assert_eq!(adapter.generate(&drop), vec!["DROP INDEX IF EXISTS \"post_title_uniq\""]);
    }

    #[test]
    fn test_rebuild_without_table_info_is_skipped() {
        let op = SchemaOperation::AlterColumnNullable {
            table: "post".into(),
            column: ColumnSpec::new("legacy", "TEXT").not_null(),
            table_info: None,
        };
        assert!(SqliteAdapter::new().generate(&op).is_empty());
    }
}
