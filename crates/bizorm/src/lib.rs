//! Business-application ORM runtime.
//!
//! `bizorm` is the facade crate of the workspace. Models are declared at
//! runtime in a [`Registry`], composed from mixins and frozen into a
//! [`Catalog`] by `bootstrap`; records are then read and written through
//! [`RecordCollection`]s bound to an [`Environment`] (user, context,
//! transaction, cache).
//!
//! # Role In The Architecture
//!
//! - **Declaration**: [`Registry`], [`FieldDef`], [`MethodSignature`].
//! - **Composition**: bootstrap merges mixins, expands embedding and
//!   related fields, synthesizes link and context models and builds the
//!   dependency graph of computed fields.
//! - **Runtime**: [`Database`] runs transactions, [`Environment`] owns the
//!   cache, [`RecordCollection`] exposes search, load and CRUD.
//! - **Storage**: SQL comes from `bizorm-query`, DDL from `bizorm-schema`,
//!   the cache from `bizorm-session`; drivers implement the
//!   `bizorm-core` connection contracts.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = Registry::new();
//! registry.new_model("User")?;
//! registry.add_fields("User", [FieldDef::char("Name").required()])?;
//! let catalog = registry.bootstrap()?;
//!
//! let db = Database::new(catalog, SqliteAdapter::new(), source);
//! db.sync_database()?;
//! db.execute(1, |env| {
//!     let jane = env.pool("User")?.create(FieldMap::new().with("Name", "Jane"))?;
//!     assert_eq!(jane.get("Name")?, Value::from("Jane"));
//!     Ok(())
//! })?;
//! ```

mod bootstrap;
pub mod catalog;
pub mod config;
pub mod depends;
pub mod environment;
pub mod fields;
pub mod methods;
pub mod model;
pub mod recordset;
pub mod registry;
pub mod security;
pub mod sequence;
mod sync;

pub use catalog::Catalog;
pub use config::{DEFAULT_SENSITIVE_METHODS, RuntimeConfig};
pub use depends::{ComputeDirective, PathStep};
pub use environment::{Database, Environment};
pub use fields::{ContextFn, DefaultFn, Field, FieldDef};
pub use methods::{Arg, ArgKind, LayerFn, Method, MethodCall, MethodSignature, ReturnKind};
pub use model::{Model, ModelOptions, SqlConstraint};
pub use recordset::{GroupResult, RecordCollection};
pub use registry::{BASE_MIXIN, Registry};
pub use security::{AccessControl, AccessRules, AllowAll, EVERYONE, Permission};
pub use sequence::Sequence;

pub use bizorm_core::{
    Context, Error, FieldMap, FieldType, OnDelete, Operator, Result, Value,
};
pub use bizorm_query::{Aggregate, AggregateFunc, Condition, OrderBy, Query};
pub use bizorm_schema::SyncReport;
pub use bizorm_session::LoadStats;
