//! Schema diffing.
//!
//! Compares the desired tables with what the database reports and lists the
//! operations that reconcile them. Tables are created but never dropped: a
//! model that disappears from the registry leaves its data in place.
//!
//! Operations that some dialects can only perform by rebuilding the table
//! carry the introspected table as `table_info`.

use std::collections::HashMap;

use crate::spec::{ColumnSpec, ConstraintSpec, IndexSpec, TableSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    CreateTable(TableSpec),
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    DropColumn {
        table: String,
        column: String,
        table_info: Option<TableSpec>,
    },
    AlterColumnType {
        table: String,
        column: ColumnSpec,
        from_type: String,
        table_info: Option<TableSpec>,
    },
    AlterColumnNullable {
        table: String,
        column: ColumnSpec,
        table_info: Option<TableSpec>,
    },
    AddConstraint {
        table: String,
        constraint: ConstraintSpec,
        table_info: Option<TableSpec>,
    },
    DropConstraint {
        table: String,
        name: String,
        table_info: Option<TableSpec>,
    },
    CreateIndex {
        table: String,
        index: IndexSpec,
    },
    DropIndex {
        table: String,
        name: String,
    },
}

impl SchemaOperation {
    pub fn table(&self) -> &str {
        match self {
            SchemaOperation::CreateTable(t) => &t.name,
            SchemaOperation::AddColumn { table, .. }
            | SchemaOperation::DropColumn { table, .. }
            | SchemaOperation::AlterColumnType { table, .. }
            | SchemaOperation::AlterColumnNullable { table, .. }
            | SchemaOperation::AddConstraint { table, .. }
            | SchemaOperation::DropConstraint { table, .. }
            | SchemaOperation::CreateIndex { table, .. }
            | SchemaOperation::DropIndex { table, .. } => table,
        }
    }

    /// Short stable description, used in logs and sync reports.
    pub fn describe(&self) -> String {
        match self {
            SchemaOperation::CreateTable(t) => format!("create table {}", t.name),
            SchemaOperation::AddColumn { table, column } => {
                format!("add column {}.{}", table, column.name)
            }
            SchemaOperation::DropColumn { table, column, .. } => {
                format!("drop column {}.{}", table, column)
            }
            SchemaOperation::AlterColumnType {
                table,
                column,
                from_type,
                ..
            } => format!(
                "alter column {}.{} type {} -> {}",
                table, column.name, from_type, column.sql_type
            ),
            SchemaOperation::AlterColumnNullable { table, column, .. } => format!(
                "alter column {}.{} {}",
                table,
                column.name,
                if column.nullable { "drop not null" } else { "set not null" }
            ),
            SchemaOperation::AddConstraint {
                table, constraint, ..
            } => format!("add constraint {} on {}", constraint.name, table),
            SchemaOperation::DropConstraint { table, name, .. } => {
                format!("drop constraint {} on {}", name, table)
            }
            SchemaOperation::CreateIndex { table, index } => {
                format!("create index {} on {}", index.name, table)
            }
            SchemaOperation::DropIndex { table, name } => {
                format!("drop index {} on {}", name, table)
            }
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            SchemaOperation::DropColumn { .. }
                | SchemaOperation::AlterColumnType { .. }
                | SchemaOperation::DropConstraint { .. }
        )
    }
}

/// Operations turning `actual` into `desired` for one table.
///
/// Order: obsolete indexes and constraints go first, then columns are
/// added, altered and dropped, then new constraints and indexes are added.
/// Added columns are always nullable; a NOT NULL requirement is applied by
/// the following alter so existing rows are reported instead of rejected
/// at ADD COLUMN time.
pub fn diff_table(desired: &TableSpec, actual: Option<&TableSpec>) -> Vec<SchemaOperation> {
    let Some(actual) = actual else {
        return vec![SchemaOperation::CreateTable(desired.clone())];
    };
    let table = desired.name.clone();
    let info = || Some(actual.clone());
    let mut ops = Vec::new();

    for index in &actual.indexes {
        let keep = desired.get_index(&index.name).is_some_and(|d| d == index);
        if index.is_managed() && !keep {
            ops.push(SchemaOperation::DropIndex {
                table: table.clone(),
                name: index.name.clone(),
            });
        }
    }
    for constraint in &actual.constraints {
        if desired.get_constraint(&constraint.name).is_none() {
            ops.push(SchemaOperation::DropConstraint {
                table: table.clone(),
                name: constraint.name.clone(),
                table_info: info(),
            });
        }
    }

    for column in &desired.columns {
        match actual.get_column(&column.name) {
            None => {
                let mut added = column.clone();
                added.nullable = true;
                ops.push(SchemaOperation::AddColumn {
                    table: table.clone(),
                    column: added,
                });
            }
            Some(existing) if existing.primary_key || column.primary_key => {}
            Some(existing) => {
                if !existing.same_type(column) {
                    ops.push(SchemaOperation::AlterColumnType {
                        table: table.clone(),
                        column: column.clone(),
                        from_type: existing.sql_type.clone(),
                        table_info: info(),
                    });
                }
                if existing.nullable != column.nullable {
                    ops.push(SchemaOperation::AlterColumnNullable {
                        table: table.clone(),
                        column: column.clone(),
                        table_info: info(),
                    });
                }
            }
        }
    }
    for column in &actual.columns {
        if !column.primary_key && desired.get_column(&column.name).is_none() {
            ops.push(SchemaOperation::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
                table_info: info(),
            });
        }
    }

    for constraint in &desired.constraints {
        if actual.get_constraint(&constraint.name).is_none() {
            ops.push(SchemaOperation::AddConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
                table_info: info(),
            });
        }
    }
    for index in &desired.indexes {
        let present = actual.get_index(&index.name).is_some_and(|a| a == index);
        if !present {
            ops.push(SchemaOperation::CreateIndex {
                table: table.clone(),
                index: index.clone(),
            });
        }
    }
    ops
}

/// Operations for every desired table, given the tables the database has.
pub fn diff(desired: &[TableSpec], actual: &[TableSpec]) -> Vec<SchemaOperation> {
    let by_name: HashMap<&str, &TableSpec> = actual.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut ops: Vec<SchemaOperation> = Vec::new();
    // creations first so foreign keys of later tables find their targets
    for table in desired {
        if !by_name.contains_key(table.name.as_str()) {
            ops.push(SchemaOperation::CreateTable(table.clone()));
        }
    }
    for table in desired {
        if let Some(existing) = by_name.get(table.name.as_str()) {
            ops.extend(diff_table(table, Some(existing)));
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizorm_core::OnDelete;

    fn user_table() -> TableSpec {
        TableSpec::new("user")
            .column(ColumnSpec::id("INTEGER"))
            .column(ColumnSpec::new("name", "VARCHAR(64)").not_null())
            .column(ColumnSpec::new("profile_id", "INTEGER").references("profile", OnDelete::SetNull))
            .constraint(ConstraintSpec::new("user_name_uniq", "UNIQUE (name)"))
            .index(IndexSpec::for_column("user", "profile_id"))
    }

    #[test]
    fn test_missing_table_is_created() {
        let ops = diff(&[user_table()], &[]);
        assert_eq!(ops, vec![SchemaOperation::CreateTable(user_table())]);
    }

    #[test]
    fn test_identical_tables_need_nothing() {
        assert!(diff(&[user_table()], &[user_table()]).is_empty());
    }

    #[test]
    fn test_removed_tables_are_kept() {
        let other = TableSpec::new("legacy").column(ColumnSpec::id("INTEGER"));
        assert!(diff(&[user_table()], &[user_table(), other]).is_empty());
    }

    #[test]
    fn test_added_column_is_nullable_then_tightened() {
        let actual = TableSpec {
            columns: user_table()
                .columns
                .into_iter()
                .filter(|c| c.name != "name")
                .collect(),
            ..user_table()
        };
        let ops = diff_table(&user_table(), Some(&actual));
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            SchemaOperation::AddColumn { column, .. } => {
                assert_eq!(column.name, "name");
                assert!(column.nullable);
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut after_add = user_table();
        after_add.columns[1].nullable = true;
        let ops = diff_table(&user_table(), Some(&after_add));
        assert!(matches!(
            &ops[..],
            [SchemaOperation::AlterColumnNullable { column, table_info: Some(_), .. }] if !column.nullable
        ));
    }

    #[test]
    fn test_type_change_and_dropped_column() {
        let mut actual = user_table();
        actual.columns[1].sql_type = "TEXT".into();
        actual.columns.push(ColumnSpec::new("obsolete", "INTEGER"));
        let ops = diff_table(&user_table(), Some(&actual));
        let described: Vec<String> = ops.iter().map(SchemaOperation::describe).collect();
        assert_eq!(
            described,
            vec![
                "alter column user.name type TEXT -> VARCHAR(64)",
                "drop column user.obsolete",
            ]
        );
        assert!(ops.iter().all(SchemaOperation::is_destructive));
    }

    #[test]
    fn test_constraints_and_indexes_are_reconciled() {
        let mut actual = user_table();
        actual.constraints = vec![ConstraintSpec::new("user_old_check", "CHECK (1)")];
        actual.indexes = vec![
            IndexSpec::for_column("user", "name"),
            IndexSpec {
                name: "handmade".into(),
                columns: vec!["name".into()],
                unique: false,
            },
        ];
        let described: Vec<String> = diff_table(&user_table(), Some(&actual))
            .iter()
            .map(SchemaOperation::describe)
            .collect();
        assert_eq!(
            described,
            vec![
                "drop index user_name_index on user",
                "drop constraint user_old_check on user",
                "add constraint user_name_uniq on user",
                "create index user_profile_id_index on user",
            ]
        );
    }
}
