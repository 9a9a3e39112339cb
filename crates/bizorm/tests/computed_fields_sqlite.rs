//! Computed fields and the record cache against SQLite.

mod common;

use bizorm::{Condition, FieldMap, Operator, Value};

#[test]
fn stored_age_follows_the_profile() {
    let h = common::blog();
    let id = h
        .db
        .execute(1, |env| common::user_with_age(env, "Jane", 23))
        .unwrap();

    h.db.execute(1, |env| {
        let user = env.pool("User")?.browse_one(id);
        assert_eq!(user.get("Age")?, Value::Int(23));

        user.get_records("Profile")?.set("Age", 24)?;
        assert_eq!(user.get("Age")?, Value::Int(24));
        Ok(())
    })
    .unwrap();

    // the recomputed value was written to the user table
    let found = h
        .db
        .execute(1, |env| {
            env.pool("User")?
                .search(Condition::leaf("Age", Operator::Equals, 24))
                .ids()
        })
        .unwrap();
    assert_eq!(found, vec![id]);
}

#[test]
fn relinking_the_profile_recomputes_the_age() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let id = common::user_with_age(env, "Jane", 23)?;
        let older = env.pool("Profile")?.create(FieldMap::new().with("Age", 40))?;
        let user = env.pool("User")?.browse_one(id);

        user.set("Profile", older.ensure_one()?)?;
        assert_eq!(user.get("Age")?, Value::Int(40));

        user.set("Profile", Value::Null)?;
        assert_eq!(user.get("Age")?, Value::Null);
        Ok(())
    })
    .unwrap();
}

#[test]
fn deleting_the_profile_clears_the_age() {
    let h = common::blog();
    let id = h
        .db
        .execute(1, |env| common::user_with_age(env, "Jane", 23))
        .unwrap();

    h.db.execute(1, |env| {
        let user = env.pool("User")?.browse_one(id);
        assert_eq!(user.get("Age")?, Value::Int(23));
        assert_eq!(user.get_records("Profile")?.unlink()?, 1);
        assert_eq!(user.get("Profile")?, Value::Null);
        assert_eq!(user.get("Age")?, Value::Null);
        Ok(())
    })
    .unwrap();

    let age = h
        .db
        .execute(1, |env| env.pool("User")?.browse_one(id).get("Age"))
        .unwrap();
    assert_eq!(age, Value::Null);
}

#[test]
fn non_stored_count_is_invalidated_by_new_children() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let user = env.pool("User")?.create(FieldMap::new().with("Name", "Jane"))?;
        let id = user.ensure_one()?;
        let posts = env.pool("Post")?;
        for title in ["First", "Second"] {
            posts.create(FieldMap::new().with("Title", title).with("User", id))?;
        }
        assert_eq!(user.get("PostCount")?, Value::Int(2));

        posts.create(FieldMap::new().with("Title", "Third").with("User", id))?;
        assert_eq!(user.get("PostCount")?, Value::Int(3));

        let first = posts.search(Condition::leaf("Title", Operator::Equals, "First"));
        first.unlink()?;
        assert_eq!(user.get("PostCount")?, Value::Int(2));
        Ok(())
    })
    .unwrap();
}

#[test]
fn cached_values_are_read_without_queries() {
    let h = common::blog();
    let counter = h.counter();

    let id = h
        .db
        .execute(1, |env| {
            let user = env.pool("User")?.create(
                FieldMap::new()
                    .with("Name", "Jane")
                    .with("Email", "jane@example.com"),
            )?;
            let before = common::count(&counter);
            assert_eq!(user.get("Name")?, Value::from("Jane"));
            assert_eq!(user.get("Email")?, Value::from("jane@example.com"));
            assert_eq!(user.get("Active")?, Value::Bool(true));
            assert_eq!(common::count(&counter), before);
            user.ensure_one()
        })
        .unwrap();

    h.db.execute(1, |env| {
        let user = env.pool("User")?.browse_one(id);
        let before = common::count(&counter);
        user.load(&[])?;
        let loaded = common::count(&counter);
        assert!(loaded > before);

        assert_eq!(user.get("Name")?, Value::from("Jane"));
        assert_eq!(user.get("Email")?, Value::from("jane@example.com"));
        assert_eq!(user.get("Age")?, Value::Null);
        assert_eq!(common::count(&counter), loaded);

        // a fresh read after invalidation goes back to the database
        env.invalidate_cache();
        assert_eq!(user.get("Name")?, Value::from("Jane"));
        assert_eq!(common::count(&counter), loaded + 1);
        Ok(())
    })
    .unwrap();
}

#[test]
fn dotted_paths_load_in_one_query() {
    let h = common::blog();
    let counter = h.counter();
    let id = h
        .db
        .execute(1, |env| common::user_with_age(env, "Jane", 31))
        .unwrap();

    h.db.execute(1, |env| {
        let user = env.pool("User")?.browse_one(id);
        let before = common::count(&counter);
        assert_eq!(user.get("Profile.Age")?, Value::Int(31));
        assert_eq!(common::count(&counter), before + 1);
        // the hop was cached on the way
        assert!(user.get("Profile")?.as_i64().is_some());
        assert_eq!(common::count(&counter), before + 1);
        Ok(())
    })
    .unwrap();
}
