//! Searching, ordering, grouping and set operations against SQLite.

mod common;

use bizorm::{Aggregate, AggregateFunc, Condition, Environment, FieldMap, Operator, Value};

struct People {
    alice: i64,
    bob: i64,
    carol: i64,
}

fn seed(env: &Environment) -> bizorm::Result<People> {
    let alice = common::user_with_age(env, "Alice", 30)?;
    let bob = common::user_with_age(env, "Bob", 25)?;
    let users = env.pool("User")?;
    let carol = users
        .create(FieldMap::new().with("Name", "Carol").with("Email", ""))?
        .ensure_one()?;
    users.browse_one(alice).set("Email", "alice@example.com")?;

    let posts = env.pool("Post")?;
    for (title, user, score) in [("A1", alice, 3), ("A2", alice, 4), ("B1", bob, 5)] {
        posts.create(
            FieldMap::new()
                .with("Title", title)
                .with("User", user)
                .with("Score", score),
        )?;
    }
    Ok(People { alice, bob, carol })
}

#[test]
fn empty_values_match_null() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let p = seed(env)?;
        let users = env.pool("User")?;

        let blank = users.search(Condition::leaf("Email", Operator::Equals, ""));
        assert_eq!(blank.ids()?, vec![p.bob, p.carol]);
        let set = users.search(Condition::leaf("Email", Operator::NotEquals, ""));
        assert_eq!(set.ids()?, vec![p.alice]);

        // a relation compared with false means no related record
        let orphans = users.search(Condition::leaf("Profile", Operator::Equals, false));
        assert_eq!(orphans.ids()?, vec![p.carol]);

        let none = users.search(Condition::leaf("Name", Operator::In, Value::List(Vec::new())));
        assert!(none.is_empty()?);
        let all = users.search(Condition::leaf("Name", Operator::NotIn, Value::List(Vec::new())));
        assert_eq!(all.len()?, 3);
        Ok(())
    })
    .unwrap();
}

#[test]
fn ordering_and_paging() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let p = seed(env)?;
        let users = env.pool("User")?;

        // default order is by name
        assert_eq!(users.search_all().ids()?, vec![p.alice, p.bob, p.carol]);

        let aged = users.search(Condition::leaf("Age", Operator::Greater, 0));
        assert_eq!(aged.order_by(&["Age"])?.ids()?, vec![p.bob, p.alice]);
        assert_eq!(aged.order_by(&["Age desc"])?.ids()?, vec![p.alice, p.bob]);
        assert!(users.order_by(&["Missing"]).is_err());

        let page = users.search_all().limit(2).offset(1);
        assert_eq!(page.ids()?, vec![p.bob, p.carol]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn parsed_conditions_and_paths() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let p = seed(env)?;
        let users = env.pool("User")?;

        let cond: Condition = "Name = \"Alice\" OR Age < 26".parse()?;
        assert_eq!(users.search(cond).ids()?, vec![p.alice, p.bob]);

        let cond: Condition = "NOT (Name like \"o\")".parse()?;
        assert_eq!(users.search(cond).ids()?, vec![p.alice]);

        let cond: Condition = "Profile.Age >= 25 AND Name in [\"Bob\", \"Carol\"]".parse()?;
        assert_eq!(users.search(cond).ids()?, vec![p.bob]);

        let posts = env.pool("Post")?;
        let by_alice = posts.search(Condition::leaf("User.Name", Operator::Equals, "Alice"));
        assert_eq!(by_alice.search_count()?, 2);

        // one-to-many paths match parents with at least one such child
        let prolific = users.search(Condition::leaf("Posts.Score", Operator::GreaterOrEqual, 4));
        assert_eq!(prolific.ids()?, vec![p.alice, p.bob]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn grouped_reads_aggregate_per_group() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let p = seed(env)?;
        let groups = env
            .pool("Post")?
            .search_all()
            .group_by(&["User"])
            .read_group(&[
                Aggregate::new("Score", AggregateFunc::Sum),
                Aggregate::new("Score", AggregateFunc::Max),
            ])?;
        assert_eq!(groups.len(), 2);

        assert_eq!(groups[0].group.get("User"), Some(&Value::Int(p.alice)));
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[1].group.get("User"), Some(&Value::Int(p.bob)));
        assert_eq!(groups[1].count, 1);

        let json = serde_json::to_value(&groups[0]).unwrap();
        assert_eq!(json["count"], 2);
        Ok(())
    })
    .unwrap();

    let sums = h
        .db
        .execute(1, |env| {
            env.pool("Post")?
                .search_all()
                .group_by(&["User"])
                .read_group(&[Aggregate::new("Score", AggregateFunc::Sum)])
        })
        .unwrap();
    let totals: Vec<Option<i64>> = sums
        .iter()
        .map(|g| g.aggregates.get("Score").and_then(Value::as_i64))
        .collect();
    assert_eq!(totals, vec![Some(7), Some(5)]);
}

#[test]
fn set_operations_and_filters() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let p = seed(env)?;
        let users = env.pool("User")?;
        let older = users.search(Condition::leaf("Age", Operator::Greater, 26));
        let everyone = users.search_all();

        assert_eq!(older.union(&everyone)?.ids()?, vec![p.alice, p.bob, p.carol]);
        assert_eq!(everyone.intersect(&older)?.ids()?, vec![p.alice]);
        assert_eq!(everyone.subtract(&older)?.ids()?, vec![p.bob, p.carol]);
        assert!(everyone.union(&env.pool("Post")?.search_all()).is_err());

        let with_email = everyone.filtered(|u| {
            Ok(u.get("Email")?.as_str().is_some_and(|e| e.contains('@')))
        })?;
        assert_eq!(with_email.ids()?, vec![p.alice]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn parent_loops_are_detected() {
    let h = common::blog();
    h.db.execute(1, |env| {
        let p = seed(env)?;
        let users = env.pool("User")?;
        users.browse_one(p.alice).set("Parent", p.bob)?;
        users.browse_one(p.bob).set("Parent", p.carol)?;
        assert!(users.search_all().check_recursion("Parent")?);

        users.browse_one(p.carol).set("Parent", p.alice)?;
        assert!(!users.browse_one(p.alice).check_recursion("Parent")?);
        assert!(users.search_all().check_recursion("Name").is_err());
        Ok(())
    })
    .unwrap();
}
