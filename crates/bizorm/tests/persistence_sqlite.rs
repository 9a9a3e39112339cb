//! Schema evolution of a file database across catalogs.

mod common;

use bizorm::{Database, FieldDef, FieldMap, Value};
use bizorm_sqlite::{SqliteAdapter, SqliteSource};

#[test]
fn data_survives_catalog_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blog.db");

    let db = Database::new(
        common::blog_registry().bootstrap().unwrap(),
        SqliteAdapter::new(),
        SqliteSource::open(&path).unwrap(),
    );
    let report = db.sync_database().unwrap();
    assert!(report.created.contains(&"user".to_string()));
    let id = db
        .execute(1, |env| common::user_with_age(env, "Jane", 41))
        .unwrap();
    drop(db);

    let mut registry = common::blog_registry();
    registry
        .add_fields("User", [FieldDef::char("Nickname").size(32).index()])
        .unwrap();
    let db = Database::new(
        registry.bootstrap().unwrap(),
        SqliteAdapter::new(),
        SqliteSource::open(&path).unwrap(),
    );
    let report = db.sync_database().unwrap();
    assert!(report.created.is_empty());
    assert!(!report.applied.is_empty());

    let (name, age, nickname) = db
        .execute(1, |env| {
            let user = env.pool("User")?.browse_one(id);
            Ok((user.get("Name")?, user.get("Age")?, user.get("Nickname")?))
        })
        .unwrap();
    assert_eq!(name, Value::from("Jane"));
    assert_eq!(age, Value::Int(41));
    assert_eq!(nickname, Value::Null);

    db.execute(1, |env| env.pool("User")?.browse_one(id).write(FieldMap::new().with("Nickname", "JJ")))
        .unwrap();

    let again = db.sync_database().unwrap();
    assert!(again.is_noop(), "{:?}", again);
}
