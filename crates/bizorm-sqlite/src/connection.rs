//! Blocking SQLite connections over `rusqlite`.
//!
//! [`SqliteSource`] hands out [`SqliteConnection`]s. File databases get a
//! fresh `rusqlite` connection per acquire; an in-memory database only
//! exists inside its connection, so every acquire shares the same one.
//!
//! Values are stored the way SQLite types them: booleans as `0`/`1`, dates
//! and datetimes as ISO text. Lock contention (`SQLITE_BUSY`/`SQLITE_LOCKED`)
//! surfaces as a serialization error so the runtime retries the
//! transaction.
//!
//! # Example
//!
//! ```ignore
//! let source = SqliteSource::open("app.db")?;
//! let mut conn = source.acquire()?;
//! conn.begin(IsolationLevel::Serializable)?;
//! let id = conn.insert("INSERT INTO \"user\" (\"name\") VALUES (?1)", &[Value::from("Jane")])?;
//! conn.commit()?;
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use bizorm_core::{
    Connection, ConnectionError, ConnectionSource, Error, IsolationLevel, QueryError,
    QueryErrorKind, Result, Row, TypeError, Value,
};
use rusqlite::ErrorCode;
use rusqlite::types::{Value as SqlValue, ValueRef};

use crate::config::SqliteConfig;

type Shared = Arc<Mutex<rusqlite::Connection>>;

fn connection_error(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        message: message.into(),
    })
}

/// Opens and configures a raw connection.
fn open_raw(config: &SqliteConfig) -> Result<rusqlite::Connection> {
    let conn = match &config.path {
        Some(path) => rusqlite::Connection::open(path),
        None => rusqlite::Connection::open_in_memory(),
    }
    .map_err(|e| connection_error(format!("cannot open SQLite database: {}", e)))?;

    conn.busy_timeout(config.busy_timeout)
        .map_err(|e| connection_error(e.to_string()))?;
    conn.pragma_update(None, "foreign_keys", config.foreign_keys)
        .map_err(|e| connection_error(e.to_string()))?;
    if let (Some(mode), false) = (&config.journal_mode, config.is_memory()) {
        conn.pragma_update(None, "journal_mode", mode)
            .map_err(|e| connection_error(e.to_string()))?;
    }
    Ok(conn)
}

// ============================================================================
// Source
// ============================================================================

/// Connection factory for one SQLite database.
pub struct SqliteSource {
    config: SqliteConfig,
    shared: Option<Shared>,
}

impl SqliteSource {
    pub fn new(config: SqliteConfig) -> Result<Self> {
        let conn = open_raw(&config)?;
        tracing::info!(
            path = ?config.path,
            foreign_keys = config.foreign_keys,
            "Opened SQLite database"
        );
        let shared = config
            .is_memory()
            .then(|| Arc::new(Mutex::new(conn)));
        Ok(Self { config, shared })
    }

    /// Private in-memory database shared by every acquired connection.
    pub fn in_memory() -> Result<Self> {
        Self::new(SqliteConfig::memory())
    }

    /// File database, created when missing.
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::new(SqliteConfig::file(path))
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }
}

impl ConnectionSource for SqliteSource {
    fn acquire(&self) -> Result<Box<dyn Connection>> {
        let inner = match &self.shared {
            Some(shared) => Arc::clone(shared),
            None => Arc::new(Mutex::new(open_raw(&self.config)?)),
        };
        Ok(Box::new(SqliteConnection {
            inner,
            foreign_keys: self.config.foreign_keys,
            in_transaction: false,
        }))
    }
}

// ============================================================================
// Connection
// ============================================================================

pub struct SqliteConnection {
    inner: Shared,
    foreign_keys: bool,
    /// A transaction opened through [`Connection::begin`] is active.
    in_transaction: bool,
}

impl SqliteConnection {
    /// Wraps an already configured `rusqlite` connection.
    pub fn from_rusqlite(conn: rusqlite::Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
            foreign_keys: true,
            in_transaction: false,
        }
    }

    fn lock(inner: &Shared) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        inner
            .lock()
            .map_err(|_| connection_error("SQLite connection lock poisoned"))
    }

    /// Maps a driver error, and closes a statement batch (such as a table
    /// rebuild) that failed half-way outside of a runtime transaction.
    fn fail(&self, conn: &rusqlite::Connection, err: rusqlite::Error, sql: &str) -> Error {
        let error = map_error(conn, err, sql);
        if !self.in_transaction && !conn.is_autocommit() {
            tracing::warn!(sql, "Rolling back failed statement batch");
            let _ = conn.execute_batch("ROLLBACK");
            if self.foreign_keys {
                let _ = conn.execute_batch("PRAGMA foreign_keys=ON");
            }
        }
        error
    }

    fn batch(&mut self, sql: &str) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let conn = Self::lock(&inner)?;
        tracing::trace!(target: "bizorm::sql", sql, "batch");
        conn.execute_batch(sql)
            .map_err(|e| map_error(&conn, e, sql))
    }
}

fn bind(params: &[Value]) -> Result<Vec<SqlValue>> {
    params.iter().map(to_sql).collect()
}

fn run_query(conn: &rusqlite::Connection, sql: &str, params: &[SqlValue]) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>()
        .into();
    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(from_sql(row.get_ref(i)?));
        }
        out.push(Row::new(Arc::clone(&columns), values));
    }
    Ok(out)
}

fn run_execute(conn: &rusqlite::Connection, sql: &str, params: &[SqlValue]) -> rusqlite::Result<u64> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        return stmt
            .execute(rusqlite::params_from_iter(params.iter()))
            .map(|n| n as u64);
    }
    // statements returning rows (some PRAGMAs) are stepped through
    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    while rows.next()?.is_some() {}
    Ok(0)
}

impl Connection for SqliteConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let bound = bind(params)?;
        let inner = Arc::clone(&self.inner);
        let conn = Self::lock(&inner)?;
        tracing::trace!(target: "bizorm::sql", sql, params = bound.len(), "query");
        run_query(&conn, sql, &bound).map_err(|e| self.fail(&conn, e, sql))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let bound = bind(params)?;
        let inner = Arc::clone(&self.inner);
        let conn = Self::lock(&inner)?;
        tracing::trace!(target: "bizorm::sql", sql, params = bound.len(), "execute");
        run_execute(&conn, sql, &bound).map_err(|e| self.fail(&conn, e, sql))
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        let bound = bind(params)?;
        let inner = Arc::clone(&self.inner);
        let conn = Self::lock(&inner)?;
        tracing::trace!(target: "bizorm::sql", sql, params = bound.len(), "insert");
        run_execute(&conn, sql, &bound).map_err(|e| self.fail(&conn, e, sql))?;
        Ok(conn.last_insert_rowid())
    }

    fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        // SQLite transactions are always serializable; IMMEDIATE takes the
        // write lock up front so conflicts surface at BEGIN.
        tracing::debug!(isolation = isolation.as_sql(), "BEGIN IMMEDIATE");
        self.batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT")?;
        self.in_transaction = false;
        tracing::debug!("COMMIT");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        let inner = Arc::clone(&self.inner);
        let conn = Self::lock(&inner)?;
        if conn.is_autocommit() {
            return Ok(());
        }
        tracing::debug!("ROLLBACK");
        conn.execute_batch("ROLLBACK")
            .map_err(|e| map_error(&conn, e, "ROLLBACK"))
    }
}

// ============================================================================
// Values
// ============================================================================

pub(crate) fn to_sql(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Ids(ids) if ids.len() == 1 => SqlValue::Integer(ids[0]),
        other => return Err(Error::Type(TypeError::new("scalar", other.type_name()))),
    })
}

pub(crate) fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

// ============================================================================
// Errors
// ============================================================================

fn map_error(conn: &rusqlite::Connection, err: rusqlite::Error, sql: &str) -> Error {
    let (kind, message) = match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            let message = msg.unwrap_or_else(|| e.to_string());
            let kind = match e.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    QueryErrorKind::Serialization
                }
                ErrorCode::ConstraintViolation => QueryErrorKind::Constraint,
                _ if message.contains("syntax error") || message.starts_with("no such") => {
                    QueryErrorKind::Syntax
                }
                _ => QueryErrorKind::Database,
            };
            (kind, message)
        }
        other => (QueryErrorKind::Database, other.to_string()),
    };
    let mut error = QueryError::new(kind, message).with_sql(sql);
    if kind == QueryErrorKind::Constraint {
        if let Some(name) = constraint_name(conn, &error.message) {
            error = error.with_constraint(name);
        }
    }
    Error::Query(error)
}

/// Constraint name of a constraint violation message.
///
/// CHECK failures carry the name; UNIQUE failures list `table.column`s and
/// are matched against the unique indexes of the table.
fn constraint_name(conn: &rusqlite::Connection, message: &str) -> Option<String> {
    let (_, detail) = message.split_once("constraint failed: ")?;
    let detail = detail.trim();
    if message.starts_with("CHECK") {
        return Some(detail.to_string());
    }
    if !message.starts_with("UNIQUE") {
        return None;
    }
    let mut table = String::new();
    let mut columns = Vec::new();
    for part in detail.split(',') {
        let (t, c) = part.trim().split_once('.')?;
        table = t.to_string();
        columns.push(c.to_string());
    }
    unique_index_for(conn, &table, &columns)
}

fn unique_index_for(conn: &rusqlite::Connection, table: &str, columns: &[String]) -> Option<String> {
    let mut list = conn
        .prepare("SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1")
        .ok()?;
    let names: Vec<String> = list
        .query_map([table], |r| r.get(0))
        .ok()?
        .filter_map(std::result::Result::ok)
        .collect();
    let mut info = conn
        .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
        .ok()?;
    names.into_iter().find(|name| {
        info.query_map([name.as_str()], |r| r.get::<_, String>(0))
            .map(|rows| rows.filter_map(std::result::Result::ok).collect::<Vec<_>>() == columns)
            .unwrap_or(false)
    })
}
