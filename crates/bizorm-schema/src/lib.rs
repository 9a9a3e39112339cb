//! Schema description, diffing and synchronization for bizorm.
//!
//! The runtime derives a [`TableSpec`] per persisted model and hands the
//! list to [`SchemaSync`], which reads the live schema through the
//! [`Adapter`], computes the [`SchemaOperation`]s with [`diff`] and runs the
//! statements the adapter's [`DdlGenerator`] produces for them.
//!
//! # Example
//!
//! ```ignore
//! let report = SchemaSync::new(&adapter).run(&mut *conn, &tables)?;
//! tracing::info!(created = ?report.created, "schema ready");
//! ```

pub mod adapter;
pub mod ddl;
pub mod diff;
pub mod spec;
pub mod sync;

pub use adapter::{Adapter, Introspector, SequenceInfo, SequenceOps};
pub use ddl::DdlGenerator;
pub use diff::{SchemaOperation, diff, diff_table};
pub use spec::{ColumnSpec, ConstraintSpec, ForeignKeySpec, IndexSpec, TableSpec};
pub use sync::{SchemaSync, SyncReport};
