//! Blocking database connection contract.
//!
//! Drivers implement [`Connection`]; a [`ConnectionSource`] hands out one
//! connection per environment. Every call blocks the calling flow.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Transaction isolation level requested at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    #[default]
    Serializable,
}

impl IsolationLevel {
    pub const fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A checked-out database connection.
///
/// `sql` uses the placeholder style of the matching dialect.
pub trait Connection {
    /// Runs a statement returning rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Runs an INSERT and returns the id of the new row.
    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64>;

    fn begin(&mut self, isolation: IsolationLevel) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// Supplies connections to new environments.
pub trait ConnectionSource: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn Connection>>;
}
