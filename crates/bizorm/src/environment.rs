//! Environments and transactions.
//!
//! An [`Environment`] is one database transaction seen by one user with one
//! context. It owns the checked-out connection, the record cache, the load
//! tracker and the call-depth counter; clones made by
//! [`with_context`](Environment::with_context) or [`sudo`](Environment::sudo)
//! share all of them.
//!
//! Environments are single-threaded (`Rc`/`RefCell`). Concurrent flows use
//! separate environments obtained from a [`Database`].
//!
//! # Example
//!
//! ```ignore
//! let db = Database::new(catalog, SqliteAdapter::new(), SqliteSource::in_memory()?);
//! db.sync_database()?;
//!
//! let id = db.execute(1, |env| {
//!     let user = env.pool("User")?.create(FieldMap::new().with("Name", "Jane"))?;
//!     user.ensure_one()
//! })?;
//! ```

use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use bizorm_core::{
    Connection, ConnectionSource, Context, Dialect, Error, FieldMeta, IsolationLevel,
    PermissionError, Result, Row, Value,
};
use bizorm_query::SlugSource;
use bizorm_schema::{Adapter, SyncReport};
use bizorm_session::{Cache, LoadStats, LoadTracker};

use crate::catalog::Catalog;
use crate::config::RuntimeConfig;
use crate::fields::Field;
use crate::recordset::RecordCollection;
use crate::security::{AccessControl, AllowAll};
use crate::sequence::Sequence;

/// State shared by an environment and its derived copies.
struct EnvShared {
    catalog: Arc<Catalog>,
    adapter: Arc<dyn Adapter>,
    access: Arc<dyn AccessControl>,
    config: Arc<RuntimeConfig>,
    conn: RefCell<Box<dyn Connection>>,
    cache: RefCell<Cache>,
    tracker: RefCell<LoadTracker>,
    depth: Cell<usize>,
    /// `Model.Method` of the calls in progress, innermost last.
    call_stack: RefCell<Vec<String>>,
    savepoints: Cell<u32>,
}

/// A transaction bound to a user and a context.
#[derive(Clone)]
pub struct Environment {
    shared: Rc<EnvShared>,
    uid: i64,
    context: Rc<Context>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("uid", &self.uid)
            .field("context", &self.context)
            .field("depth", &self.shared.depth.get())
            .finish_non_exhaustive()
    }
}

/// Leaves a method call when dropped.
pub(crate) struct CallGuard {
    shared: Rc<EnvShared>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.shared.depth.set(self.shared.depth.get().saturating_sub(1));
        self.shared.call_stack.borrow_mut().pop();
    }
}

impl Environment {
    fn new(
        db: &Database,
        conn: Box<dyn Connection>,
        uid: i64,
        context: Context,
    ) -> Self {
        let tracker = LoadTracker::new().with_threshold(db.config.load_warn_threshold);
        Self {
            shared: Rc::new(EnvShared {
                catalog: Arc::clone(&db.catalog),
                adapter: Arc::clone(&db.adapter),
                access: Arc::clone(&db.access),
                config: Arc::clone(&db.config),
                conn: RefCell::new(conn),
                cache: RefCell::new(Cache::new()),
                tracker: RefCell::new(tracker),
                depth: Cell::new(0),
                call_stack: RefCell::new(Vec::new()),
                savepoints: Cell::new(0),
            }),
            uid,
            context: Rc::new(context),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn catalog(&self) -> &Catalog {
        &self.shared.catalog
    }

    pub(crate) fn catalog_arc(&self) -> Arc<Catalog> {
        Arc::clone(&self.shared.catalog)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.shared.adapter.as_ref()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.shared.adapter.as_dialect()
    }

    pub(crate) fn access(&self) -> &dyn AccessControl {
        self.shared.access.as_ref()
    }

    pub fn is_superuser(&self) -> bool {
        self.uid == self.shared.config.superuser_id
    }

    /// An empty record collection of `model`.
    pub fn pool(&self, model: &str) -> Result<RecordCollection> {
        let m = self.catalog().must_model(model)?;
        if m.is_mixin() {
            return Err(Error::Argument(bizorm_core::ArgumentError::new(
                model,
                "pool",
                "mixins have no records",
            )));
        }
        Ok(RecordCollection::new(self.clone(), model))
    }

    /// Same transaction with `key` set in the context.
    #[must_use]
    pub fn with_context(&self, key: &str, value: impl Into<Value>) -> Environment {
        let mut context = (*self.context).clone();
        context.set(key, value);
        self.with_new_context(context)
    }

    /// Same transaction with another context.
    #[must_use]
    pub fn with_new_context(&self, context: Context) -> Environment {
        Environment {
            shared: Rc::clone(&self.shared),
            uid: self.uid,
            context: Rc::new(context),
        }
    }

    /// Same transaction as the superuser.
    #[must_use]
    pub fn sudo(&self) -> Environment {
        self.sudo_as(self.shared.config.superuser_id)
    }

    /// Same transaction as `uid`.
    #[must_use]
    pub fn sudo_as(&self, uid: i64) -> Environment {
        Environment {
            shared: Rc::clone(&self.shared),
            uid,
            context: Rc::clone(&self.context),
        }
    }

    // ========================================================================
    // Database access
    // ========================================================================

    pub(crate) fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::debug!(target: "bizorm::sql", sql, params = params.len(), "query");
        self.shared.conn.borrow_mut().query(sql, params)
    }

    pub(crate) fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::debug!(target: "bizorm::sql", sql, params = params.len(), "execute");
        self.shared.conn.borrow_mut().execute(sql, params)
    }

    pub(crate) fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        tracing::debug!(target: "bizorm::sql", sql, params = params.len(), "insert");
        self.shared.conn.borrow_mut().insert(sql, params)
    }

    /// Runs `f` with the raw connection (adapter calls).
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut dyn Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.shared.conn.borrow_mut();
        f(&mut **conn)
    }

    fn begin(&self, isolation: IsolationLevel) -> Result<()> {
        self.shared.conn.borrow_mut().begin(isolation)
    }

    fn commit(&self) -> Result<()> {
        self.shared.conn.borrow_mut().commit()
    }

    fn rollback(&self) -> Result<()> {
        self.shared.conn.borrow_mut().rollback()
    }

    /// Runs `f` inside a savepoint that is always rolled back, restoring
    /// the cache as it was before.
    pub(crate) fn rollback_scope<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let n = self.shared.savepoints.get() + 1;
        self.shared.savepoints.set(n);
        let name = self.dialect().quote_identifier(&format!("bizorm_sp{}", n));
        let snapshot = self.shared.cache.borrow().clone();

        let result = self
            .execute(&format!("SAVEPOINT {}", name), &[])
            .and_then(|_| f());
        let restored = self
            .execute(&format!("ROLLBACK TO SAVEPOINT {}", name), &[])
            .and_then(|_| self.execute(&format!("RELEASE SAVEPOINT {}", name), &[]));
        *self.shared.cache.borrow_mut() = snapshot;
        self.shared.savepoints.set(n - 1);
        tracing::debug!(savepoint = n, ok = result.is_ok(), "Rolled back simulation scope");

        let value = result?;
        restored?;
        Ok(value)
    }

    // ========================================================================
    // Cache
    // ========================================================================

    pub(crate) fn cache(&self) -> RefMut<'_, Cache> {
        self.shared.cache.borrow_mut()
    }

    pub(crate) fn tracker(&self) -> RefMut<'_, LoadTracker> {
        self.shared.tracker.borrow_mut()
    }

    /// Context slug selecting the values of `field` in this environment.
    pub fn slug_for(&self, field: &Field) -> String {
        if !field.is_contexted() {
            return String::new();
        }
        let values = field.context_values(self);
        Context::slug(values.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Slug for the terminal field of `path` on `model`.
    pub(crate) fn slug_for_path(&self, model: &str, path: &str) -> String {
        let Ok(steps) = self.catalog().expand_path(model, path) else {
            return String::new();
        };
        steps
            .last()
            .and_then(|s| self.catalog().field(&s.model, &s.field))
            .map(|f| self.slug_for(f))
            .unwrap_or_default()
    }

    pub(crate) fn slugs(&self) -> EnvSlugs<'_> {
        EnvSlugs { env: self }
    }

    /// Drops everything cached in this transaction.
    pub fn invalidate_cache(&self) {
        self.cache().invalidate_all();
    }

    pub fn cache_debug_state(&self) -> String {
        self.shared.cache.borrow().debug_state()
    }

    pub fn load_stats(&self) -> LoadStats {
        self.shared.tracker.borrow().stats()
    }

    // ========================================================================
    // Method calls
    // ========================================================================

    /// Enters a method call, failing past the configured depth.
    pub(crate) fn enter_call(&self, model: &str, method: &str) -> Result<CallGuard> {
        let limit = self.shared.config.max_recursion_depth;
        let depth = self.shared.depth.get() + 1;
        if depth > limit {
            tracing::error!(model, method, limit, "Maximum recursion depth exceeded");
            return Err(Error::RecursionDepthExceeded {
                model: model.to_string(),
                method: method.to_string(),
                limit,
            });
        }
        self.shared.depth.set(depth);
        self.shared
            .call_stack
            .borrow_mut()
            .push(format!("{}.{}", model, method));
        Ok(CallGuard {
            shared: Rc::clone(&self.shared),
        })
    }

    /// Method currently executing, as `Model.Method`.
    pub fn current_caller(&self) -> Option<String> {
        self.shared.call_stack.borrow().last().cloned()
    }

    /// Asks access control whether the user may run `model.method`.
    /// Granted methods pass unless they are sensitive.
    pub(crate) fn check_execute(&self, model: &str, method: &str, granted: bool) -> Result<()> {
        if self.is_superuser() {
            return Ok(());
        }
        if granted && !self.shared.config.is_sensitive(method) {
            return Ok(());
        }
        let caller = self.current_caller();
        if self
            .shared
            .access
            .may_execute(self.uid, model, method, caller.as_deref())
        {
            return Ok(());
        }
        tracing::warn!(uid = self.uid, model, method, caller = ?caller, "Execution denied");
        Err(Error::Permission(PermissionError {
            uid: self.uid,
            model: model.to_string(),
            method: method.to_string(),
            caller,
        }))
    }

    // ========================================================================
    // Sequences
    // ========================================================================

    /// Creates a sequence at runtime.
    pub fn create_sequence(&self, name: &str, start: i64, increment: i64) -> Result<Sequence> {
        Sequence::create(self, name, start, increment)
    }

    /// A boot or runtime sequence by name.
    pub fn sequence(&self, name: &str) -> Result<Sequence> {
        Sequence::get(self, name)
    }
}

/// Slug source of an environment for the query builder.
pub(crate) struct EnvSlugs<'a> {
    env: &'a Environment,
}

impl SlugSource for EnvSlugs<'_> {
    fn slug(&self, field: &FieldMeta) -> String {
        self.env
            .catalog()
            .field(&field.model, &field.name)
            .map(|f| self.env.slug_for(f))
            .unwrap_or_default()
    }
}

// ============================================================================
// Database
// ============================================================================

/// Entry point of the runtime: a frozen catalog bound to a database.
pub struct Database {
    catalog: Arc<Catalog>,
    adapter: Arc<dyn Adapter>,
    source: Arc<dyn ConnectionSource>,
    access: Arc<dyn AccessControl>,
    config: Arc<RuntimeConfig>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.adapter.as_dialect().name())
            .field("models", &self.catalog.models().count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn new<A, S>(catalog: Arc<Catalog>, adapter: A, source: S) -> Self
    where
        A: Adapter + 'static,
        S: ConnectionSource + 'static,
    {
        Self {
            catalog,
            adapter: Arc::new(adapter),
            source: Arc::new(source),
            access: Arc::new(AllowAll),
            config: Arc::new(RuntimeConfig::default()),
        }
    }

    #[must_use]
    pub fn with_access_control(mut self, access: impl AccessControl + 'static) -> Self {
        self.access = Arc::new(access);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Creates or updates the tables, constraints, indexes and boot
    /// sequences of every persisted model.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn sync_database(&self) -> Result<SyncReport> {
        let mut conn = self.source.acquire()?;
        crate::sync::sync(&self.catalog, self.adapter.as_ref(), conn.as_mut())
    }

    /// Runs `f` in a new transaction as `uid`, committing on success.
    ///
    /// Serialization failures, including at commit, restart the whole
    /// transaction in a fresh environment, up to
    /// [`RuntimeConfig::max_transaction_attempts`] times.
    pub fn execute<T, F>(&self, uid: i64, f: F) -> Result<T>
    where
        F: FnMut(&Environment) -> Result<T>,
    {
        self.execute_with_context(uid, Context::new(), f)
    }

    #[tracing::instrument(level = "debug", skip(self, context, f))]
    pub fn execute_with_context<T, F>(&self, uid: i64, context: Context, mut f: F) -> Result<T>
    where
        F: FnMut(&Environment) -> Result<T>,
    {
        let attempts = self.config.max_transaction_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(uid, &context, &mut f) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && self.adapter.as_dialect().is_serialization_error(&e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Serialization failure, retrying transaction");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt<T, F>(&self, uid: i64, context: &Context, f: &mut F) -> Result<T>
    where
        F: FnMut(&Environment) -> Result<T>,
    {
        let env = Environment::new(self, self.source.acquire()?, uid, context.clone());
        env.begin(self.config.isolation)?;
        // a failed commit leaves the transaction open, so it is rolled back too
        let result = f(&env).and_then(|value| env.commit().map(|()| value));
        if let Err(e) = &result {
            if let Err(rollback) = env.rollback() {
                tracing::error!(error = %rollback, "Rollback failed");
            }
            tracing::debug!(error = %e, "Transaction rolled back");
        }
        result
    }

    /// Runs `f` in a transaction that is always rolled back.
    #[tracing::instrument(level = "debug", skip(self, f))]
    pub fn simulate<T, F>(&self, uid: i64, f: F) -> Result<T>
    where
        F: FnOnce(&Environment) -> Result<T>,
    {
        let env = Environment::new(self, self.source.acquire()?, uid, Context::new());
        env.begin(self.config.isolation)?;
        let result = f(&env);
        let rollback = env.rollback();
        tracing::debug!(ok = result.is_ok(), "Simulation rolled back");
        let value = result?;
        rollback?;
        Ok(value)
    }
}
