//! Core types and contracts for bizorm.
//!
//! `bizorm-core` is the foundation layer shared by the query builder, the
//! schema synchronizer, the cache and the record runtime.
//!
//! # Role In The Architecture
//!
//! - **Values**: [`Value`] and [`FieldMap`] carry field data everywhere.
//! - **Field types**: [`FieldType`] tags scalar and relation fields.
//! - **Errors**: [`Error`] is the single error type of the workspace.
//! - **Metadata**: [`MetaView`] exposes how fields are stored and linked.
//! - **Drivers**: [`Connection`], [`ConnectionSource`] and [`Dialect`] are
//!   the contracts a database driver implements.

pub mod connection;
pub mod context;
pub mod dialect;
pub mod error;
pub mod identifiers;
pub mod meta;
pub mod operator;
pub mod row;
pub mod types;
pub mod validate;
pub mod value;

pub use connection::{Connection, ConnectionSource, IsolationLevel};
pub use context::Context;
pub use dialect::{Dialect, GenericDialect};
pub use error::{
    ArgumentError, ConnectionError, ConstraintError, DeclarationError, DeclarationErrorKind,
    Error, ParseError, PermissionError, QueryError, QueryErrorKind, Result, TypeError,
    declaration_error, query_error_msg,
};
pub use identifiers::{quote_ident, snake_case};
pub use meta::{ContextLink, FieldMeta, LinkMeta, MetaView};
pub use operator::Operator;
pub use row::Row;
pub use types::{FieldType, OnDelete};
pub use value::{FieldMap, Value};
