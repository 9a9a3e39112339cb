//! Statement builders for INSERT, UPDATE and DELETE.
//!
//! Writes always target a single table and identify rows by simple column
//! filters (`id IN (...)`, `col = value`), so these builders stay small:
//!
//! - INSERT of one row, falling back to `DEFAULT VALUES` when empty
//! - UPDATE with explicit SET pairs
//! - DELETE by filter

use bizorm_core::{Connection, Dialect, Result, Value};

/// A column filter of an UPDATE or DELETE.
#[derive(Debug, Clone)]
enum Filter {
    In { column: String, values: Vec<Value> },
    NotIn { column: String, values: Vec<Value> },
    Eq { column: String, value: Value },
}

impl Filter {
    fn render(&self, dialect: &dyn Dialect, params: &mut Vec<Value>) -> String {
        let q = |c: &str| dialect.quote_identifier(c);
        let marks = |values: &[Value], params: &mut Vec<Value>| {
            values
                .iter()
                .map(|v| {
                    params.push(v.clone());
                    dialect.placeholder(params.len())
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Filter::In { values, .. } if values.is_empty() => "1 = 0".to_string(),
            Filter::NotIn { values, .. } if values.is_empty() => "1 = 1".to_string(),
            Filter::In { column, values } => {
                format!("{} IN ({})", q(column), marks(values, params))
            }
            Filter::NotIn { column, values } => {
                format!("{} NOT IN ({})", q(column), marks(values, params))
            }
            Filter::Eq { column, value } if value.is_null() => format!("{} IS NULL", q(column)),
            Filter::Eq { column, value } => {
                params.push(value.clone());
                format!("{} = {}", q(column), dialect.placeholder(params.len()))
            }
        }
    }
}

fn render_filters(filters: &[Filter], dialect: &dyn Dialect, params: &mut Vec<Value>) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = filters.iter().map(|f| f.render(dialect, params)).collect();
    format!(" WHERE {}", parts.join(" AND "))
}

/// INSERT of a single row.
///
/// # Example
///
/// ```ignore
/// let id = InsertBuilder::new("user")
///     .value("name", "Jane")
///     .value("age", 30)
///     .execute(conn, dialect)?;
/// ```
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    values: Vec<(String, Value)>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    /// Adds a column value. A later value for the same column replaces it.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        if let Some(slot) = self.values.iter_mut().find(|(c, _)| *c == column) {
            slot.1 = value;
        } else {
            self.values.push((column, value));
        }
        self
    }

    pub fn build(&self, dialect: &dyn Dialect) -> (String, Vec<Value>) {
        if self.values.is_empty() {
            return (dialect.insert_default_values(&self.table), Vec::new());
        }
        let columns: Vec<String> = self
            .values
            .iter()
            .map(|(c, _)| dialect.quote_identifier(c))
            .collect();
        let marks: Vec<String> = (1..=self.values.len())
            .map(|i| dialect.placeholder(i))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote_identifier(&self.table),
            columns.join(", "),
            marks.join(", ")
        );
        (sql, self.values.iter().map(|(_, v)| v.clone()).collect())
    }

    /// Runs the INSERT and returns the new row id.
    pub fn execute(&self, conn: &mut dyn Connection, dialect: &dyn Dialect) -> Result<i64> {
        let (sql, params) = self.build(dialect);
        conn.insert(&sql, &params)
    }
}

/// UPDATE with explicit SET pairs.
///
/// # Example
///
/// ```ignore
/// UpdateBuilder::new("user")
///     .set("age", 26)
///     .where_in("id", &[1, 2])
///     .execute(conn, dialect)?;
/// ```
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    sets: Vec<(String, Value)>,
    filters: Vec<Filter>,
}

impl UpdateBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sets.push((column.into(), value.into()));
        self
    }

    pub fn where_in(mut self, column: impl Into<String>, ids: &[i64]) -> Self {
        self.filters.push(Filter::In {
            column: column.into(),
            values: ids.iter().map(|id| Value::Int(*id)).collect(),
        });
        self
    }

    pub fn where_not_in(mut self, column: impl Into<String>, ids: &[i64]) -> Self {
        self.filters.push(Filter::NotIn {
            column: column.into(),
            values: ids.iter().map(|id| Value::Int(*id)).collect(),
        });
        self
    }

    /// `column = value`, or `column IS NULL` for a null value.
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Builds the statement; an UPDATE without SET pairs builds to an empty
    /// string.
    pub fn build(&self, dialect: &dyn Dialect) -> (String, Vec<Value>) {
        if self.sets.is_empty() {
            return (String::new(), Vec::new());
        }
        let mut params = Vec::new();
        let mut set_clauses = Vec::new();
        for (column, value) in &self.sets {
            params.push(value.clone());
            set_clauses.push(format!(
                "{} = {}",
                dialect.quote_identifier(column),
                dialect.placeholder(params.len())
            ));
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_identifier(&self.table),
            set_clauses.join(", ")
        );
        sql.push_str(&render_filters(&self.filters, dialect, &mut params));
        (sql, params)
    }

    /// Runs the UPDATE and returns the number of rows affected.
    pub fn execute(&self, conn: &mut dyn Connection, dialect: &dyn Dialect) -> Result<u64> {
        let (sql, params) = self.build(dialect);
        if sql.is_empty() {
            return Ok(0);
        }
        conn.execute(&sql, &params)
    }
}

/// DELETE by column filters.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    filters: Vec<Filter>,
}

impl DeleteBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    pub fn where_in(mut self, column: impl Into<String>, ids: &[i64]) -> Self {
        self.filters.push(Filter::In {
            column: column.into(),
            values: ids.iter().map(|id| Value::Int(*id)).collect(),
        });
        self
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn build(&self, dialect: &dyn Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(&self.table));
        sql.push_str(&render_filters(&self.filters, dialect, &mut params));
        (sql, params)
    }

    /// Runs the DELETE and returns the number of rows removed.
    pub fn execute(&self, conn: &mut dyn Connection, dialect: &dyn Dialect) -> Result<u64> {
        let (sql, params) = self.build(dialect);
        conn.execute(&sql, &params)
    }
}
