//! Create, read, write, copy and unlink against SQLite.

mod common;

use bizorm::{Condition, Error, FieldMap, Operator, Value};

#[test]
fn create_write_and_read_back() {
    let h = common::blog();
    let id = h
        .db
        .execute(1, |env| {
            let user = env.pool("User")?.create(
                FieldMap::new()
                    .with("Name", "Jane")
                    .with("Email", "jane@example.com"),
            )?;
            user.write(FieldMap::new().with("Name", "Jane Doe").with("Active", false))?;
            user.ensure_one()
        })
        .unwrap();

    let rows = h
        .db
        .execute(1, |env| {
            env.pool("User")?
                .browse_one(id)
                .read(&["Name", "Email", "Active", "CreateDate"])
        })
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("ID"), Some(&Value::Int(id)));
    assert_eq!(row.get("Name"), Some(&Value::from("Jane Doe")));
    assert_eq!(row.get("Email"), Some(&Value::from("jane@example.com")));
    assert_eq!(row.get("Active"), Some(&Value::Bool(false)));
    assert!(matches!(row.get("CreateDate"), Some(Value::DateTime(_))));
}

#[test]
fn false_clears_non_boolean_fields() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let user = env.pool("User")?.create(
            FieldMap::new()
                .with("Name", "Jane")
                .with("Email", "jane@example.com"),
        )?;
        user.set("Email", false)?;
        assert_eq!(user.get("Email")?, Value::Null);
        user.force_load(&["Email"])?;
        assert_eq!(user.get("Email")?, Value::Null);
        Ok(())
    })
    .unwrap();
}

#[test]
fn one2many_ids_replace_and_nested_creates_append() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let user = env.pool("User")?.create(FieldMap::new().with("Name", "Jane"))?;
        let posts = env.pool("Post")?;
        let p1 = posts.create(FieldMap::new().with("Title", "One"))?.ensure_one()?;
        let p2 = posts.create(FieldMap::new().with("Title", "Two"))?.ensure_one()?;

        user.set("Posts", vec![p2, p1])?;
        assert_eq!(user.get("Posts")?, Value::Ids(vec![p1, p2]));
        assert_eq!(posts.browse_one(p1).get("User")?, Value::Int(user.ensure_one()?));

        user.set("Posts", vec![p1])?;
        assert_eq!(user.get("Posts")?, Value::Ids(vec![p1]));
        assert_eq!(posts.browse_one(p2).get("User")?, Value::Null);

        user.set("Posts", FieldMap::new().with("Title", "Nested"))?;
        let titles: Vec<Value> = user
            .get_records("Posts")?
            .records()?
            .iter()
            .map(|p| p.get("Title"))
            .collect::<bizorm::Result<_>>()?;
        assert_eq!(titles, vec![Value::from("One"), Value::from("Nested")]);
        Ok(())
    })
    .unwrap();

    // the links survived the commit
    let count = h
        .db
        .execute(1, |env| {
            env.pool("Post")?
                .search(Condition::leaf("User", Operator::NotEquals, Value::Null))
                .search_count()
        })
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn many2many_is_seen_from_both_sides() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let user = env.pool("User")?.create(FieldMap::new().with("Name", "Jane"))?;
        let uid = user.ensure_one()?;
        let tags = env.pool("Tag")?;
        let rust = tags.create(FieldMap::new().with("Name", "rust"))?.ensure_one()?;
        let sql = tags.create(FieldMap::new().with("Name", "sql"))?.ensure_one()?;

        user.set("Tags", vec![rust, sql])?;
        assert_eq!(tags.browse_one(rust).get("Users")?, Value::Ids(vec![uid]));
        assert_eq!(tags.browse_one(sql).get("Users")?, Value::Ids(vec![uid]));

        user.set("Tags", vec![sql])?;
        assert_eq!(tags.browse_one(rust).get("Users")?, Value::Ids(vec![]));
        assert_eq!(user.get("Tags")?, Value::Ids(vec![sql]));

        // and the other way round
        tags.browse_one(rust).set("Users", vec![uid])?;
        assert_eq!(user.get("Tags")?, Value::Ids(vec![rust, sql]));
        Ok(())
    })
    .unwrap();

    let linked = h
        .db
        .execute(1, |env| {
            env.pool("Tag")?
                .search(Condition::leaf("Users.Name", Operator::Equals, "Jane"))
                .search_count()
        })
        .unwrap();
    assert_eq!(linked, 2);
}

#[test]
fn copy_duplicates_owned_records() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let id = common::user_with_age(env, "Jane", 30)?;
        let user = env.pool("User")?.browse_one(id);
        let tag = env.pool("Tag")?.create(FieldMap::new().with("Name", "rust"))?;
        user.set("Tags", tag.ids()?)?;
        env.pool("Post")?
            .create(FieldMap::new().with("Title", "Hello").with("User", id))?;

        let copy = user.copy(FieldMap::new().with("Name", "Jane (copy)"))?;
        assert_ne!(copy.ensure_one()?, id);
        assert_eq!(copy.get("Name")?, Value::from("Jane (copy)"));
        assert_eq!(copy.get("Age")?, Value::Int(30));
        assert_ne!(copy.get("Profile")?, user.get("Profile")?);
        assert_eq!(copy.get("Tags")?, user.get("Tags")?);

        let posts = copy.get_records("Posts")?;
        assert_eq!(posts.len()?, 1);
        assert_ne!(posts.ids()?, user.get_records("Posts")?.ids()?);
        assert_eq!(posts.records()?[0].get("Title")?, Value::from("Hello"));
        Ok(())
    })
    .unwrap();
}

#[test]
fn unlink_cascades_in_the_database() {
    let h = common::blog();
    let id = h
        .db
        .execute(1, |env| {
            let user = env.pool("User")?.create(FieldMap::new().with("Name", "Jane"))?;
            user.set(
                "Posts",
                Value::Create(vec![
                    FieldMap::new().with("Title", "One"),
                    FieldMap::new().with("Title", "Two"),
                ]),
            )?;
            user.ensure_one()
        })
        .unwrap();

    let deleted = h
        .db
        .execute(1, |env| env.pool("User")?.browse_one(id).unlink())
        .unwrap();
    assert_eq!(deleted, 1);

    let (users, posts) = h
        .db
        .execute(1, |env| {
            Ok((
                env.pool("User")?.search_all().search_count()?,
                env.pool("Post")?.search_all().search_count()?,
            ))
        })
        .unwrap();
    assert_eq!((users, posts), (0, 0));
}

#[test]
fn sql_constraints_are_reported_with_their_message() {
    let h = common::blog();
    let err = h
        .db
        .execute(1, |env| {
            env.pool("Post")?
                .create(FieldMap::new().with("Title", "Bad").with("Score", -1))?;
            Ok(())
        })
        .unwrap_err();
    match err {
        Error::Constraint(c) => {
            assert_eq!(c.model, "Post");
            assert_eq!(c.message, "Score must be positive");
        }
        other => panic!("expected a constraint error, got {:?}", other),
    }

    let err = h
        .db
        .execute(1, |env| {
            let users = env.pool("User")?;
            users.create(FieldMap::new().with("Name", "A").with("Email", "same@example.com"))?;
            users.create(FieldMap::new().with("Name", "B").with("Email", "same@example.com"))?;
            Ok(())
        })
        .unwrap_err();
    assert!(err.is_constraint());
    assert_eq!(err.to_string(), "Email must be unique");

    // the failed transactions left nothing behind
    let count = h
        .db
        .execute(1, |env| env.pool("User")?.search_all().search_count())
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn required_fields_are_enforced() {
    let h = common::blog();
    let err = h
        .db
        .execute(1, |env| {
            env.pool("Post")?.create(FieldMap::new().with("Score", 3))?;
            Ok(())
        })
        .unwrap_err();
    assert!(err.is_constraint());
}
