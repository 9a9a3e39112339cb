//! SQLite dialect and adapter.
//!
//! [`SqliteAdapter`] is split over several modules: DDL in [`crate::ddl`],
//! introspection in [`crate::introspect`] and sequences in
//! [`crate::sequence`]. This module holds the SQL spelling and the field
//! type mapping.

use bizorm_core::{Dialect, FieldType, Operator};
use bizorm_schema::Adapter;

/// Internal tables never reported as model tables.
pub(crate) const INTERNAL_TABLES: [&str; 1] = [crate::sequence::SEQUENCE_TABLE];

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn operator_sql(&self, op: Operator) -> &'static str {
        // LIKE is case-insensitive for ASCII in SQLite; there is no ILIKE
        match op {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::Like | Operator::Contains | Operator::ILike | Operator::IContains => "LIKE",
            Operator::NotContains | Operator::NotIContains => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Lower => "<",
            Operator::LowerOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
        }
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            // OFFSET is only valid after a LIMIT
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {}", offset),
            (None, None) => String::new(),
        }
    }
}

/// The SQLite [`Adapter`].
#[derive(Debug, Clone)]
pub struct SqliteAdapter {
    dialect: SqliteDialect,
    /// Re-enable foreign key enforcement after table rebuilds.
    pub(crate) foreign_keys: bool,
}

impl Default for SqliteAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteAdapter {
    pub fn new() -> Self {
        Self {
            dialect: SqliteDialect,
            foreign_keys: true,
        }
    }

    /// Adapter for databases opened with foreign keys disabled.
    #[must_use]
    pub fn without_foreign_keys(mut self) -> Self {
        self.foreign_keys = false;
        self
    }
}

impl Adapter for SqliteAdapter {
    fn as_dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn type_sql(&self, field_type: FieldType, size: Option<u32>) -> Option<String> {
        let sql = match field_type {
            FieldType::Char => match size {
                Some(n) if n > 0 => return Some(format!("VARCHAR({})", n)),
                _ => "TEXT",
            },
            FieldType::Text | FieldType::Html | FieldType::Selection => "TEXT",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "REAL",
            FieldType::Date => "DATE",
            FieldType::DateTime => "DATETIME",
            FieldType::Binary => "BLOB",
            FieldType::Many2One | FieldType::One2One => "INTEGER",
            FieldType::Rev2One | FieldType::One2Many | FieldType::Many2Many => return None,
        };
        Some(sql.to_string())
    }

    fn id_type_sql(&self) -> String {
        "INTEGER".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_spelling() {
        let d = SqliteDialect;
        assert_eq!(d.placeholder(2), "?2");
        assert_eq!(d.operator_sql(Operator::IContains), "LIKE");
        assert_eq!(d.operator_sql(Operator::NotIContains), "NOT LIKE");
        assert_eq!(d.limit_offset(None, Some(5)), " LIMIT -1 OFFSET 5");
        assert_eq!(d.limit_offset(Some(2), None), " LIMIT 2");
        assert_eq!(d.limit_offset(None, None), "");
    }

    #[test]
    fn test_type_mapping() {
        let a = SqliteAdapter::new();
        assert_eq!(a.type_sql(FieldType::Char, Some(64)).as_deref(), Some("VARCHAR(64)"));
        assert_eq!(a.type_sql(FieldType::Char, None).as_deref(), Some("TEXT"));
        assert_eq!(a.type_sql(FieldType::Many2One, None).as_deref(), Some("INTEGER"));
        assert_eq!(a.type_sql(FieldType::Many2Many, None), None);
        assert_eq!(a.id_type_sql(), "INTEGER");
        assert_eq!(a.as_dialect().name(), "sqlite");
    }
}
