//! Shared fixtures for the SQLite integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bizorm::{
    Arg, Catalog, Database, FieldDef, FieldMap, MethodSignature, OnDelete, Registry, Result,
};
use bizorm_core::{Connection, ConnectionSource, IsolationLevel, Row, Value};
use bizorm_sqlite::{SqliteAdapter, SqliteSource};

// ============================================================================
// Query counting
// ============================================================================

/// Connection counting the `SELECT`s it runs.
struct CountingConnection {
    inner: Box<dyn Connection>,
    queries: Arc<AtomicUsize>,
}

impl Connection for CountingConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.inner.execute(sql, params)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        self.inner.insert(sql, params)
    }

    fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.inner.begin(isolation)
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.rollback()
    }
}

/// In-memory SQLite source whose connections share one query counter.
pub struct CountingSource {
    inner: SqliteSource,
    queries: Arc<AtomicUsize>,
}

impl ConnectionSource for CountingSource {
    fn acquire(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(CountingConnection {
            inner: self.inner.acquire()?,
            queries: Arc::clone(&self.queries),
        }))
    }
}

/// A synchronized in-memory database for `catalog`.
pub struct Harness {
    pub db: Database,
    queries: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let queries = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner: SqliteSource::in_memory().unwrap(),
            queries: Arc::clone(&queries),
        };
        let db = Database::new(catalog, SqliteAdapter::new(), source);
        db.sync_database().unwrap();
        Self { db, queries }
    }

    /// Replaces the database, keeping the counter (for `with_config` and
    /// `with_access_control`).
    pub fn map_db(self, f: impl FnOnce(Database) -> Database) -> Self {
        Self {
            db: f(self.db),
            queries: self.queries,
        }
    }

    /// `SELECT`s run so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Counter shared with closures running inside a transaction.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.queries)
    }
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

// ============================================================================
// Models
// ============================================================================

/// Users with profiles, posts and tags.
///
/// - `User.Age` is stored and computed from `Profile.Age`;
/// - `User.PostCount` is computed on the fly from `Posts`;
/// - `User.Tags` and `Tag.Users` share one link table.
pub fn blog_registry() -> Registry {
    let mut r = Registry::new();
    r.new_model("Profile").unwrap();
    r.add_fields("Profile", [FieldDef::integer("Age"), FieldDef::char("City").size(32)])
        .unwrap();

    r.new_model("User").unwrap();
    r.add_fields(
        "User",
        [
            FieldDef::char("Name").required().size(64),
            FieldDef::char("Email").unique(),
            FieldDef::boolean("Active").default_value(true),
            FieldDef::one2one("Profile", "Profile").on_delete(OnDelete::SetNull),
            FieldDef::integer("Age")
                .compute("ComputeAge")
                .stored()
                .depends(&["Profile", "Profile.Age"]),
            FieldDef::one2many("Posts", "Post", "User"),
            FieldDef::integer("PostCount")
                .compute("ComputePostCount")
                .depends(&["Posts"]),
            FieldDef::many2many("Tags", "Tag"),
            FieldDef::many2one("Parent", "User"),
        ],
    )
    .unwrap();
    r.set_default_order("User", &["Name"]).unwrap();
    r.declare_method("User", "ComputeAge", MethodSignature::compute(), |call| {
        let age = call.records().get("Profile.Age")?;
        Ok(Arg::Map(FieldMap::new().with("Age", age)))
    })
    .unwrap();
    r.declare_method("User", "ComputePostCount", MethodSignature::compute(), |call| {
        let posts = call.records().get("Posts")?.to_ids().unwrap_or_default();
        Ok(Arg::Map(FieldMap::new().with("PostCount", posts.len() as i64)))
    })
    .unwrap();

    r.new_model("Post").unwrap();
    r.add_fields(
        "Post",
        [
            FieldDef::char("Title").required(),
            FieldDef::many2one("User", "User").on_delete(OnDelete::Cascade),
            FieldDef::integer("Score"),
            FieldDef::text("Body"),
        ],
    )
    .unwrap();
    r.add_sql_constraint("Post", "score_positive", "CHECK (score >= 0)", "Score must be positive")
        .unwrap();

    r.new_model("Tag").unwrap();
    r.add_fields(
        "Tag",
        [FieldDef::char("Name").required(), FieldDef::many2many("Users", "User")],
    )
    .unwrap();
    r
}

pub fn blog() -> Harness {
    Harness::new(blog_registry().bootstrap().unwrap())
}

/// Creates a user with a profile of the given age.
pub fn user_with_age(env: &bizorm::Environment, name: &str, age: i64) -> Result<i64> {
    let profile = env
        .pool("Profile")?
        .create(FieldMap::new().with("Age", age))?
        .ensure_one()?;
    env.pool("User")?
        .create(FieldMap::new().with("Name", name).with("Profile", profile))?
        .ensure_one()
}
