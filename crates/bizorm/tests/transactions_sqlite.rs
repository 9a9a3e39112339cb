//! Transactions, method layers and onchange against SQLite.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bizorm::{
    Arg, ArgKind, Database, Error, FieldDef, FieldMap, MethodSignature, Registry, ReturnKind,
    RuntimeConfig, Value,
};
use bizorm_core::{
    Connection, ConnectionSource, IsolationLevel, QueryErrorKind, Row, query_error_msg,
};
use bizorm_sqlite::{SqliteAdapter, SqliteSource};

fn user_count(h: &common::Harness) -> u64 {
    h.db.execute(1, |env| env.pool("User")?.search_all().search_count())
        .unwrap()
}

#[test]
fn serialization_failures_restart_the_transaction() {
    let h = common::blog();
    let mut attempts = 0;
    let id = h
        .db
        .execute(1, |env| {
            attempts += 1;
            let user = env
                .pool("User")?
                .create(FieldMap::new().with("Name", format!("Try {}", attempts)))?;
            if attempts < 3 {
                return Err(query_error_msg(
                    QueryErrorKind::Serialization,
                    "could not serialize access",
                ));
            }
            user.ensure_one()
        })
        .unwrap();
    assert_eq!(attempts, 3);
    assert_eq!(user_count(&h), 1);

    let name = h
        .db
        .execute(1, |env| env.pool("User")?.browse_one(id).get("Name"))
        .unwrap();
    assert_eq!(name, Value::from("Try 3"));
}

#[test]
fn retries_stop_after_the_configured_attempts() {
    let h = common::blog().map_db(|db| db.with_config(RuntimeConfig::new().max_transaction_attempts(2)));
    let mut attempts = 0;
    let err = h
        .db
        .execute(1, |_| -> bizorm::Result<()> {
            attempts += 1;
            Err(query_error_msg(QueryErrorKind::Serialization, "busy"))
        })
        .unwrap_err();
    assert!(err.is_serialization());
    assert_eq!(attempts, 2);

    // other errors are never retried
    let mut attempts = 0;
    let err = h
        .db
        .execute(1, |env| {
            attempts += 1;
            env.pool("Missing")?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, Error::UnknownModel(_)));
    assert_eq!(attempts, 1);
}

/// Connection whose commits fail once `failing` is set.
struct FlakyCommit {
    inner: Box<dyn Connection>,
    failing: Arc<AtomicBool>,
    rollbacks: Arc<AtomicUsize>,
}

impl Connection for FlakyCommit {
    fn query(&mut self, sql: &str, params: &[Value]) -> bizorm::Result<Vec<Row>> {
        self.inner.query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> bizorm::Result<u64> {
        self.inner.execute(sql, params)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> bizorm::Result<i64> {
        self.inner.insert(sql, params)
    }

    fn begin(&mut self, isolation: IsolationLevel) -> bizorm::Result<()> {
        self.inner.begin(isolation)
    }

    fn commit(&mut self) -> bizorm::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(query_error_msg(QueryErrorKind::Database, "commit failed"));
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> bizorm::Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback()
    }
}

struct FlakySource {
    inner: SqliteSource,
    failing: Arc<AtomicBool>,
    rollbacks: Arc<AtomicUsize>,
}

impl ConnectionSource for FlakySource {
    fn acquire(&self) -> bizorm::Result<Box<dyn Connection>> {
        Ok(Box::new(FlakyCommit {
            inner: self.inner.acquire()?,
            failing: Arc::clone(&self.failing),
            rollbacks: Arc::clone(&self.rollbacks),
        }))
    }
}

#[test]
fn failed_commits_are_rolled_back() {
    let failing = Arc::new(AtomicBool::new(false));
    let rollbacks = Arc::new(AtomicUsize::new(0));
    let source = FlakySource {
        inner: SqliteSource::in_memory().unwrap(),
        failing: Arc::clone(&failing),
        rollbacks: Arc::clone(&rollbacks),
    };
    let db = Database::new(
        common::blog_registry().bootstrap().unwrap(),
        SqliteAdapter::new(),
        source,
    );
    db.sync_database().unwrap();
    let before = rollbacks.load(Ordering::SeqCst);

    failing.store(true, Ordering::SeqCst);
    let err = db
        .execute(1, |env| {
            env.pool("User")?.create(FieldMap::new().with("Name", "Lost"))?;
            Ok(())
        })
        .unwrap_err();
    assert!(!err.is_serialization());
    assert_eq!(rollbacks.load(Ordering::SeqCst), before + 1);

    failing.store(false, Ordering::SeqCst);
    let count = db
        .execute(1, |env| env.pool("User")?.search_all().search_count())
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn simulate_always_rolls_back() {
    let h = common::blog();
    let seen = h
        .db
        .simulate(1, |env| {
            let users = env.pool("User")?;
            users.create(FieldMap::new().with("Name", "Ghost"))?;
            users.search_all().search_count()
        })
        .unwrap();
    assert_eq!(seen, 1);
    assert_eq!(user_count(&h), 0);
}

#[test]
fn runaway_recursion_is_stopped() {
    let mut r = Registry::new();
    r.new_model("Node").unwrap();
    r.declare_method(
        "Node",
        "Walk",
        MethodSignature::new([], ReturnKind::Nothing),
        |call| call.records().call("Walk", Vec::new()),
    )
    .unwrap();
    let h = common::Harness::new(r.bootstrap().unwrap())
        .map_db(|db| db.with_config(RuntimeConfig::new().max_recursion_depth(20)));

    let err = h
        .db
        .execute(1, |env| env.pool("Node")?.call("Walk", Vec::new()))
        .unwrap_err();
    match err {
        Error::RecursionDepthExceeded { model, method, limit } => {
            assert_eq!((model.as_str(), method.as_str(), limit), ("Node", "Walk", 20));
        }
        other => panic!("expected a recursion error, got {:?}", other),
    }
}

#[test]
fn create_overrides_run_before_the_base_layer() {
    let mut r = common::blog_registry();
    r.extend_method("User", "Create", |call| {
        let mut data = call.map_arg(0)?;
        if !data.contains_key("Email") {
            let name = data
                .get("Name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            data.insert("Email", format!("{}@example.com", name));
        }
        call.call_next_with(vec![Arg::Map(data)])
    })
    .unwrap();
    let h = common::Harness::new(r.bootstrap().unwrap());

    let email = h
        .db
        .execute(1, |env| {
            env.pool("User")?
                .create(FieldMap::new().with("Name", "Jane"))?
                .get("Email")
        })
        .unwrap();
    assert_eq!(email, Value::from("jane@example.com"));
}

#[test]
fn the_next_layer_runs_at_most_once() {
    let mut r = common::blog_registry();
    r.extend_method("Post", "Write", |call| {
        call.call_next()?;
        call.call_next()
    })
    .unwrap();
    let h = common::Harness::new(r.bootstrap().unwrap());

    let err = h
        .db
        .execute(1, |env| {
            env.pool("Post")?
                .create(FieldMap::new().with("Title", "Draft"))?
                .set("Title", "Final")
        })
        .unwrap_err();
    assert!(matches!(err, Error::Argument(_)));
}

#[test]
fn custom_methods_and_multi_results() {
    let mut r = common::blog_registry();
    r.declare_method(
        "User",
        "Greeting",
        MethodSignature::new([ArgKind::Value], ReturnKind::Any),
        |call| {
            let name = call.records().get("Name")?;
            let greeting = call.value_arg(0)?;
            Ok(Arg::Multi(vec![Arg::Value(greeting), Arg::Value(name)]))
        },
    )
    .unwrap();
    let h = common::Harness::new(r.bootstrap().unwrap());

    h.db.execute(1, |env| {
        let user = env.pool("User")?.create(FieldMap::new().with("Name", "Jane"))?;
        let parts = user.call_multi("Greeting", vec![Arg::from("Hello")])?;
        let parts: Vec<Value> = parts.iter().map(Arg::as_value).collect::<bizorm::Result<_>>()?;
        assert_eq!(parts, vec![Value::from("Hello"), Value::from("Jane")]);

        // missing trailing arguments read as nothing
        let parts = user.call_multi("Greeting", Vec::new())?;
        assert_eq!(parts[0].as_value()?, Value::Null);
        assert_eq!(parts[1].as_value()?, Value::from("Jane"));

        let err = user
            .call("Greeting", vec![Arg::from("a"), Arg::from("b")])
            .unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
        Ok(())
    })
    .unwrap();
}

#[test]
fn onchange_reports_without_persisting() {
    let mut r = common::blog_registry();
    r.add_fields(
        "User",
        [FieldDef::char("Name").required().size(64).onchange("OnchangeName")],
    )
    .unwrap();
    r.declare_method("User", "OnchangeName", MethodSignature::onchange(), |call| {
        let name = call.records().get("Name")?;
        let email = format!("{}@example.com", name.as_str().unwrap_or_default().to_lowercase());
        Ok(Arg::Map(FieldMap::new().with("Email", email)))
    })
    .unwrap();
    let h = common::Harness::new(r.bootstrap().unwrap());

    let id = h
        .db
        .execute(1, |env| {
            let users = env.pool("User")?;
            let result = users.onchange(FieldMap::new().with("Name", "Jane"), &["Name"])?;
            assert_eq!(result.get("Email"), Some(&Value::from("jane@example.com")));
            assert_eq!(users.search_all().search_count()?, 0);

            let bob = users.create(FieldMap::new().with("Name", "Bob"))?;
            let result = bob.onchange(FieldMap::new().with("Name", "Robert"), &["Name"])?;
            assert_eq!(result.get("Email"), Some(&Value::from("robert@example.com")));
            // the record and the cache are untouched
            assert_eq!(bob.get("Name")?, Value::from("Bob"));
            assert_eq!(bob.get("Email")?, Value::Null);
            bob.ensure_one()
        })
        .unwrap();

    let email = h
        .db
        .execute(1, |env| env.pool("User")?.browse_one(id).get("Email"))
        .unwrap();
    assert_eq!(email, Value::Null);
}
