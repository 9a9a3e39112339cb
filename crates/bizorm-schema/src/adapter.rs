//! The database adapter contract consumed by the runtime.
//!
//! An adapter bundles everything database-specific: SQL spelling
//! ([`Dialect`]), DDL ([`DdlGenerator`]), introspection ([`Introspector`]),
//! sequences ([`SequenceOps`]) and the mapping of field types to column
//! types.

use bizorm_core::{Connection, Dialect, FieldType, Result};

use crate::ddl::DdlGenerator;
use crate::spec::TableSpec;

/// Reports the live schema.
pub trait Introspector {
    fn list_tables(&self, conn: &mut dyn Connection) -> Result<Vec<String>>;

    /// Columns, named constraints and indexes of `table`, or `None` when
    /// the table does not exist.
    fn table_info(&self, conn: &mut dyn Connection, table: &str) -> Result<Option<TableSpec>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInfo {
    pub name: String,
    pub start: i64,
    pub increment: i64,
}

/// Sequence lifecycle.
pub trait SequenceOps {
    fn create_sequence(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        start: i64,
        increment: i64,
    ) -> Result<()>;

    /// Changes the increment and/or restarts the sequence at `restart`.
    fn alter_sequence(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        increment: Option<i64>,
        restart: Option<i64>,
    ) -> Result<()>;

    fn drop_sequence(&self, conn: &mut dyn Connection, name: &str) -> Result<()>;

    fn next_value(&self, conn: &mut dyn Connection, name: &str) -> Result<i64>;

    fn list_sequences(&self, conn: &mut dyn Connection) -> Result<Vec<SequenceInfo>>;
}

/// Everything the runtime needs from a database.
pub trait Adapter: DdlGenerator + Introspector + SequenceOps + Send + Sync {
    fn as_dialect(&self) -> &dyn Dialect;

    /// Column type of a field, or `None` for fields without a column.
    fn type_sql(&self, field_type: FieldType, size: Option<u32>) -> Option<String>;

    /// Column type of the `id` primary key.
    fn id_type_sql(&self) -> String;
}
