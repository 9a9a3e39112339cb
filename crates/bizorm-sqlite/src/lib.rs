//! SQLite driver and adapter for bizorm.
//!
//! - [`SqliteSource`] / [`SqliteConnection`]: blocking connections over
//!   `rusqlite`, implementing the core [`Connection`](bizorm_core::Connection)
//!   contract.
//! - [`SqliteAdapter`]: dialect, DDL (with table rebuilds for the ALTERs
//!   SQLite lacks), introspection and emulated sequences.
//!
//! # Example
//!
//! ```ignore
//! let source = SqliteSource::open("app.db")?;
//! let db = Database::new(registry, Arc::new(SqliteAdapter::new()), Arc::new(source));
//! db.sync_database()?;
//! ```

pub mod adapter;
pub mod config;
pub mod connection;
pub mod ddl;
pub mod introspect;
pub mod sequence;

pub use adapter::{SqliteAdapter, SqliteDialect};
pub use config::SqliteConfig;
pub use connection::{SqliteConnection, SqliteSource};
