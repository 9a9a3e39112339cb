//! Method permissions, row rules and sequences against SQLite.

mod common;

use bizorm::{
    AccessRules, Arg, ArgKind, Condition, Error, FieldMap, MethodSignature, Operator, Permission,
    ReturnKind, Value,
};

const CLERK: i64 = 7;

fn seed_users(h: &common::Harness) -> (i64, i64) {
    h.db.execute(1, |env| {
        let users = env.pool("User")?;
        let mine = users
            .create(FieldMap::new().with("Name", "Mine"))?
            .ensure_one()?;
        let other = users
            .create(FieldMap::new().with("Name", "Other").with("Active", false))?
            .ensure_one()?;
        Ok((mine, other))
    })
    .unwrap()
}

#[test]
fn sensitive_methods_need_a_grant() {
    let h = common::blog()
        .map_db(|db| db.with_access_control(AccessRules::new().allow("User", "Load")));
    let (mine, _) = seed_users(&h);

    let name = h
        .db
        .execute(CLERK, |env| env.pool("User")?.browse_one(mine).get("Name"))
        .unwrap();
    assert_eq!(name, Value::from("Mine"));

    let err = h
        .db
        .execute(CLERK, |env| {
            env.pool("User")?.create(FieldMap::new().with("Name", "Intruder"))?;
            Ok(())
        })
        .unwrap_err();
    match err {
        Error::Permission(e) => {
            assert_eq!((e.uid, e.model.as_str(), e.method.as_str()), (CLERK, "User", "Create"));
        }
        other => panic!("expected a permission error, got {:?}", other),
    }

    // sudo runs as the superuser
    h.db.execute(CLERK, |env| {
        env.sudo()
            .pool("User")?
            .create(FieldMap::new().with("Name", "Admitted"))?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn grants_can_be_limited_to_a_caller() {
    let mut r = common::blog_registry();
    r.declare_method(
        "User",
        "AddPost",
        MethodSignature::new([ArgKind::Value], ReturnKind::Records),
        |call| {
            let user = call.records().ensure_one()?;
            let post = call.env().pool("Post")?.create(
                FieldMap::new()
                    .with("Title", call.value_arg(0)?)
                    .with("User", user),
            )?;
            Ok(Arg::Records(post))
        },
    )
    .unwrap();
    let rules = AccessRules::new()
        .add_user_to_group(CLERK, "writers")
        .allow_group("writers", "User", "AddPost")
        .allow_from("writers", "Post", "Create", "User.AddPost");
    let h = common::Harness::new(r.bootstrap().unwrap()).map_db(|db| db.with_access_control(rules));
    let (mine, _) = seed_users(&h);

    h.db.execute(CLERK, |env| {
        let user = env.pool("User")?.browse_one(mine);
        let post = user.call("AddPost", vec![Arg::from("Hello")])?;
        assert!(matches!(post, Arg::Records(_)));
        Ok(())
    })
    .unwrap();

    let err = h
        .db
        .execute(CLERK, |env| {
            env.pool("Post")?.create(FieldMap::new().with("Title", "Direct"))?;
            Ok(())
        })
        .unwrap_err();
    assert!(err.is_permission());

    // other users are not in the group
    let err = h
        .db
        .execute(8, |env| {
            env.pool("User")?
                .browse_one(mine)
                .call("AddPost", vec![Arg::from("Nope")])
        })
        .unwrap_err();
    assert!(err.is_permission());
}

#[test]
fn row_rules_filter_searches() {
    let rules = AccessRules::new().allow("User", "Load").row_rule(
        "User",
        Permission::Read,
        Condition::leaf("Active", Operator::Equals, true),
    );
    let h = common::blog().map_db(|db| db.with_access_control(rules));
    let (mine, _) = seed_users(&h);

    let (ids, count) = h
        .db
        .execute(CLERK, |env| {
            let all = env.pool("User")?.search_all();
            Ok((all.ids()?, all.search_count()?))
        })
        .unwrap();
    assert_eq!(ids, vec![mine]);
    assert_eq!(count, 1);

    let count = h
        .db
        .execute(1, |env| env.pool("User")?.search_all().search_count())
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn row_rules_guard_writes() {
    let rules = AccessRules::new()
        .allow("User", "Load")
        .allow("User", "Write")
        .row_rule(
            "User",
            Permission::Write,
            Condition::leaf("Name", Operator::Equals, "Mine"),
        );
    let h = common::blog().map_db(|db| db.with_access_control(rules));
    let (mine, other) = seed_users(&h);

    h.db.execute(CLERK, |env| {
        env.pool("User")?
            .browse_one(mine)
            .set("Email", "mine@example.com")
    })
    .unwrap();

    let err = h
        .db
        .execute(CLERK, |env| env.pool("User")?.browse(&[mine, other]).set("Active", true))
        .unwrap_err();
    assert!(err.is_permission());
}

#[test]
fn boot_sequences_are_fixed() {
    let mut r = common::blog_registry();
    r.new_sequence("Invoice", 100, 10).unwrap();
    let h = common::Harness::new(r.bootstrap().unwrap());

    h.db.execute(1, |env| {
        let seq = env.sequence("Invoice")?;
        assert!(seq.is_boot());
        assert_eq!(seq.next_value()?, 100);
        assert_eq!(seq.next_value()?, 110);
        assert!(matches!(seq.alter(Some(1), None), Err(Error::Argument(_))));
        assert!(matches!(seq.clone().drop_sequence(), Err(Error::Argument(_))));
        assert!(env.create_sequence("Invoice", 1, 1).is_err());
        Ok(())
    })
    .unwrap();

    let next = h
        .db
        .execute(1, |env| env.sequence("Invoice")?.next_value())
        .unwrap();
    assert_eq!(next, 120);
}

#[test]
fn runtime_sequences_can_be_altered_and_dropped() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let seq = env.create_sequence("Ticket", 1, 1)?;
        assert!(!seq.is_boot());
        assert_eq!(seq.next_value()?, 1);
        assert_eq!(seq.next_value()?, 2);
        seq.alter(Some(5), Some(50))?;
        assert_eq!(seq.next_value()?, 50);
        assert_eq!(seq.next_value()?, 55);
        Ok(())
    })
    .unwrap();

    h.db.execute(1, |env| {
        let seq = env.sequence("Ticket")?;
        assert_eq!(seq.next_value()?, 60);
        seq.drop_sequence()?;
        assert!(env.sequence("Ticket").is_err());
        Ok(())
    })
    .unwrap();
}
