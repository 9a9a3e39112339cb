//! Condition trees and SQL generation for bizorm.
//!
//! `bizorm-query` knows nothing about models beyond what
//! [`MetaView`](bizorm_core::MetaView) tells it. It provides:
//!
//! - [`Condition`]: ordered predicate lists with a printable, parseable form
//! - [`Query`]: condition plus ordering, paging and grouping
//! - [`SqlBuilder`]: path resolution, join planning and SELECT generation
//! - [`InsertBuilder`], [`UpdateBuilder`], [`DeleteBuilder`]: single-table writes
//!
//! # Example
//!
//! ```ignore
//! use bizorm_query::{Condition, Query, SqlBuilder};
//!
//! let cond: Condition = r#"Profile.Age > 18 AND Name ilike "jan""#.parse()?;
//! let stmt = SqlBuilder::new(&catalog, dialect, "User")?.select_ids(&Query::new(cond))?;
//! ```

pub mod builder;
pub mod condition;
pub mod join;
pub mod parse;
pub mod query;
pub mod select;

#[cfg(test)]
pub(crate) mod test_support;

pub use builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use condition::{Combinator, Condition, Predicate, Term};
pub use join::{JoinPlan, TableJoin};
pub use query::{Aggregate, AggregateFunc, OrderBy, Query};
pub use select::{DefaultSlugs, SelectStatement, SlugSource, SqlBuilder, rebind};
