//! Table descriptions shared by the desired schema and introspection.
//!
//! The runtime derives one [`TableSpec`] per persisted model; adapters
//! report the live database in the same shape so the two can be diffed.

use bizorm_core::OnDelete;
use serde::{Deserialize, Serialize};

/// `REFERENCES table (id) ON DELETE ...` of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub table: String,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Declared SQL type, e.g. `VARCHAR(64)`.
    pub sql_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub foreign_key: Option<ForeignKeySpec>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            primary_key: false,
            foreign_key: None,
        }
    }

    /// The integer primary key column every model table carries.
    pub fn id(sql_type: impl Into<String>) -> Self {
        Self {
            name: "id".to_string(),
            sql_type: sql_type.into(),
            nullable: false,
            primary_key: true,
            foreign_key: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn references(mut self, table: impl Into<String>, on_delete: OnDelete) -> Self {
        self.foreign_key = Some(ForeignKeySpec {
            table: table.into(),
            on_delete,
        });
        self
    }

    /// Whether two declared types name the same SQL type.
    pub fn same_type(&self, other: &ColumnSpec) -> bool {
        normalize_type(&self.sql_type) == normalize_type(&other.sql_type)
    }
}

fn normalize_type(sql_type: &str) -> String {
    sql_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" (", "(")
        .to_ascii_uppercase()
}

/// A named table constraint, e.g. `UNIQUE (email)` or `CHECK (age >= 0)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    /// Database name (`<table>_<declared name>`).
    pub name: String,
    pub definition: String,
}

impl ConstraintSpec {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
        }
    }

    pub fn is_unique(&self) -> bool {
        self.definition
            .trim_start()
            .to_ascii_uppercase()
            .starts_with("UNIQUE")
    }

    /// Column list of a `UNIQUE (a, b)` definition.
    pub fn unique_columns(&self) -> Vec<String> {
        if !self.is_unique() {
            return Vec::new();
        }
        let Some(open) = self.definition.find('(') else {
            return Vec::new();
        };
        let close = self.definition.rfind(')').unwrap_or(self.definition.len());
        if close <= open {
            return Vec::new();
        }
        self.definition[open + 1..close]
            .split(',')
            .map(|c| c.trim().trim_matches('"').to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    /// Plain index on one column, named `<table>_<column>_index`.
    pub fn for_column(table: &str, column: &str) -> Self {
        Self {
            name: format!("{}_{}_index", table, column),
            columns: vec![column.to_string()],
            unique: false,
        }
    }

    /// Unique index on one column, named `<table>_<column>_key`.
    pub fn unique_for_column(table: &str, column: &str) -> Self {
        Self {
            name: format!("{}_{}_key", table, column),
            columns: vec![column.to_string()],
            unique: true,
        }
    }

    /// Whether the index follows the naming of field-level indexes, and so
    /// is owned by schema synchronization.
    pub fn is_managed(&self) -> bool {
        self.name.ends_with("_index") || self.name.ends_with("_key")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub constraints: Vec<ConstraintSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn constraint(mut self, constraint: ConstraintSpec) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_constraint(&self, name: &str) -> Option<&ConstraintSpec> {
        self.constraints.iter().find(|c| c.name == name)
    }

    pub fn get_index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name)
    }
}
