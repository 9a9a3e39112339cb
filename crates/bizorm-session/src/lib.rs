//! Transaction-scoped state for bizorm environments.
//!
//! - [`Cache`] holds the field values read or written during one
//!   transaction, keyed by model, record id, field and context slug.
//! - [`LoadTracker`] counts database loads and warns about record-by-record
//!   loading.
//!
//! Both are owned by a single environment and discarded with it.
//!
//! # Example
//!
//! ```ignore
//! let mut cache = Cache::new();
//! cache.add_record(&catalog, "User", 1, &values, "");
//! assert!(cache.check_if_in_cache(&catalog, "User", &[1], &fields, "", false));
//! ```

pub mod cache;
pub mod tracker;

pub use cache::{Cache, DEFAULT_SLUG};
pub use tracker::{CallSite, LoadStats, LoadTracker};
