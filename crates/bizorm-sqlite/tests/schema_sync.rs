//! Schema synchronization against a real SQLite database.

use bizorm_core::{Connection, ConnectionSource, OnDelete, Value};
use bizorm_schema::{
    ColumnSpec, ConstraintSpec, IndexSpec, Introspector, SchemaSync, TableSpec,
};
use bizorm_sqlite::{SqliteAdapter, SqliteSource};

fn user_v1() -> TableSpec {
    TableSpec::new("user")
        .column(ColumnSpec::id("INTEGER"))
        .column(ColumnSpec::new("name", "TEXT").not_null())
        .column(ColumnSpec::new("legacy", "TEXT"))
        .column(ColumnSpec::new("age", "TEXT"))
        .index(IndexSpec::for_column("user", "legacy"))
}

fn user_v2() -> TableSpec {
    TableSpec::new("user")
        .column(ColumnSpec::id("INTEGER"))
        .column(ColumnSpec::new("name", "TEXT").not_null())
        .column(ColumnSpec::new("age", "INTEGER"))
        .column(ColumnSpec::new("email", "VARCHAR(120)"))
        .constraint(ConstraintSpec::new("user_email_uniq", "UNIQUE (\"email\")"))
        .constraint(ConstraintSpec::new("user_age_check", "CHECK (age >= 0)"))
        .index(IndexSpec::for_column("user", "name"))
}

fn post() -> TableSpec {
    TableSpec::new("post")
        .column(ColumnSpec::id("INTEGER"))
        .column(ColumnSpec::new("title", "TEXT"))
        .column(ColumnSpec::new("user_id", "INTEGER").references("user", OnDelete::Cascade))
}

fn count(conn: &mut dyn Connection, sql: &str) -> i64 {
    conn.query(sql, &[]).unwrap()[0].get_i64(0).unwrap()
}

#[test]
fn sync_creates_then_alters_preserving_rows() {
    let adapter = SqliteAdapter::new();
    let dir = tempfile::tempdir().unwrap();
    let source = SqliteSource::open(dir.path().join("sync.db")).unwrap();
    let mut conn = source.acquire().unwrap();

    let report = SchemaSync::new(&adapter)
        .run(&mut *conn, &[user_v1(), post()])
        .unwrap();
    assert_eq!(report.created, vec!["user", "post"]);

    conn.execute(
        "INSERT INTO \"user\" (\"name\", \"legacy\", \"age\") VALUES ('Jane', 'x', '42')",
        &[],
    )
    .unwrap();
    conn.execute("INSERT INTO \"post\" (\"title\", \"user_id\") VALUES ('hello', 1)", &[])
        .unwrap();

    let report = SchemaSync::new(&adapter)
        .run(&mut *conn, &[user_v2(), post()])
        .unwrap();
    assert!(report.created.is_empty());
    assert!(report.skipped.is_empty(), "skipped: {:?}", report.skipped);
    assert!(report.applied.contains(&"drop column user.legacy".to_string()));

    let info = adapter.table_info(&mut *conn, "user").unwrap().unwrap();
    let expected = user_v2();
    assert_eq!(info.columns, expected.columns);
    assert!(info.get_constraint("user_age_check").is_some());
    assert!(info.get_constraint("user_email_uniq").is_some());
    assert!(info.get_index("user_name_index").is_some());
    assert!(info.get_index("user_legacy_index").is_none());

    // data survived the rebuilds and the type change converted values
    let rows = conn
        .query("SELECT \"name\", \"age\" FROM \"user\"", &[])
        .unwrap();
    assert_eq!(rows[0].get_named("name"), Some(&Value::from("Jane")));
    assert_eq!(rows[0].get_named("age"), Some(&Value::Int(42)));

    // foreign keys of other tables still point at the rebuilt table
    conn.execute("DELETE FROM \"user\"", &[]).unwrap();
    assert_eq!(count(&mut *conn, "SELECT COUNT(*) FROM \"post\""), 0);

    // a second run has nothing left to do
    let again = SchemaSync::new(&adapter)
        .run(&mut *conn, &[user_v2(), post()])
        .unwrap();
    assert!(again.is_noop(), "{:?}", again);
}

#[test]
fn tightening_nullability_fails_on_null_rows() {
    let adapter = SqliteAdapter::new();
    let source = SqliteSource::in_memory().unwrap();
    let mut conn = source.acquire().unwrap();

    SchemaSync::new(&adapter).run(&mut *conn, &[post()]).unwrap();
    conn.execute("INSERT INTO \"post\" (\"title\") VALUES (NULL)", &[])
        .unwrap();

    let mut strict = post();
    strict.columns[1] = ColumnSpec::new("title", "TEXT").not_null();
    assert!(SchemaSync::new(&adapter).run(&mut *conn, &[strict]).is_err());

    // the failed rebuild left the table untouched and no transaction open
    let info = adapter.table_info(&mut *conn, "post").unwrap().unwrap();
    assert!(info.get_column("title").unwrap().nullable);
    assert_eq!(count(&mut *conn, "SELECT COUNT(*) FROM \"post\""), 1);
    assert_eq!(adapter.list_tables(&mut *conn).unwrap(), vec!["post"]);
}
