mod common;

use rowset::prelude::*;

use common::{open, seed, sorted};

#[test]
fn create_round_trips_through_the_database() {
    let (env, _) = open();
    let seed = seed(&env);

    let created = env
        .pool("User")
        .unwrap()
        .create(
            FieldMap::new()
                .with("ID", 999)
                .with("name", "Dan")
                .with("Email", "dan@example.com"),
        )
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_ne!(created.id().unwrap(), 999);
    assert_eq!(created.get("Name").unwrap(), Value::from("Dan"));
    assert_eq!(created.get("Profile").unwrap(), Value::Null);
    assert_eq!(created.get("PostCount").unwrap(), Value::Int(0));

    let found = env
        .pool("User")
        .unwrap()
        .filter("Email", Operator::Equals, "dan@example.com")
        .ensure_one()
        .unwrap();
    assert_eq!(found, created);
    assert_ne!(found.id().unwrap(), seed.alice);

    assert!(matches!(
        env.pool("User")
            .unwrap()
            .create(FieldMap::new().with("Nickname", "d")),
        Err(Error::UnknownField { .. })
    ));
}

#[test]
fn write_only_touches_the_collection() {
    let (env, _) = open();
    seed(&env);

    let users = env.pool("User").unwrap();
    users
        .filter("Profile.Age", Operator::Greater, 26)
        .write(FieldMap::new().with("Email", "senior@example.com"))
        .unwrap();
    assert_eq!(
        users
            .filter("Email", Operator::Equals, "senior@example.com")
            .search_count()
            .unwrap(),
        2
    );
    let bob = users.filter("Name", Operator::Equals, "Bob");
    assert_eq!(bob.get("Email").unwrap(), Value::from("bob@example.com"));

    // Nothing matches: no statement, no error.
    users
        .filter("Name", Operator::Equals, "Zed")
        .set("Email", "zed@example.com")
        .unwrap();
}

#[test]
fn many2many_values_replace_the_link_set() {
    let (env, _) = open();
    let seed = seed(&env);

    let post = env
        .pool("Post")
        .unwrap()
        .create(
            FieldMap::new()
                .with("Title", "Generics")
                .with("Tags", vec![seed.rust, seed.go, seed.rust]),
        )
        .unwrap();
    assert_eq!(sorted(&post.get("Tags").unwrap()), {
        let mut both = vec![seed.rust, seed.go];
        both.sort_unstable();
        both
    });

    post.set("Tags", vec![seed.go]).unwrap();
    assert_eq!(post.get("Tags").unwrap(), Value::Ids(vec![seed.go]));
    let tags = post.get_records("Tags").unwrap();
    assert_eq!(tags.get("Name").unwrap(), Value::from("go"));

    post.set("Tags", Vec::<i64>::new()).unwrap();
    assert_eq!(post.get("Tags").unwrap(), Value::Ids(Vec::new()));
}

#[test]
fn write_by_id_leaves_other_records_alone() {
    let (env, _) = open();
    let seed = seed(&env);

    let users = env.pool("User").unwrap();
    users
        .filter("ID", Operator::Equals, seed.alice)
        .set("Email", "a@example.com")
        .unwrap();
    let emails: Vec<Value> = users
        .order_by(&["ID"])
        .records()
        .unwrap()
        .iter()
        .map(|u| u.get("Email").unwrap())
        .collect();
    assert_eq!(
        emails,
        [
            Value::from("a@example.com"),
            Value::from("bob@example.com"),
            Value::from("carla@example.com"),
        ]
    );
}

#[test]
fn narrowing_a_loaded_collection_scopes_write_and_unlink() {
    let (env, _) = open();
    let seed = seed(&env);

    let all = env.pool("User").unwrap().load().unwrap();
    all.filter("ID", Operator::Equals, seed.alice)
        .set("Email", "x@example.com")
        .unwrap();
    let emails: Vec<Value> = all
        .order_by(&["ID"])
        .records()
        .unwrap()
        .iter()
        .map(|u| u.get("Email").unwrap())
        .collect();
    assert_eq!(
        emails,
        [
            Value::from("x@example.com"),
            Value::from("bob@example.com"),
            Value::from("carla@example.com"),
        ]
    );

    assert_eq!(all.filter("ID", Operator::Equals, seed.carla).unlink().unwrap(), 1);
    let left = env.pool("User").unwrap().order_by(&["ID"]).load().unwrap();
    assert_eq!(left.ids(), [seed.alice, seed.bob]);
}

#[test]
fn many2many_from_an_unresolved_collection() {
    let (env, _) = open();
    let seed = seed(&env);

    let go = env.pool("Tag").unwrap().filter("Name", Operator::Equals, "go");
    assert!(!go.is_resolved());
    let ownership = env
        .pool("Post")
        .unwrap()
        .filter("Title", Operator::Equals, "Ownership");
    ownership.set("Tags", Value::try_from(&go).unwrap()).unwrap();
    assert_eq!(ownership.get("Tags").unwrap(), Value::Ids(vec![seed.go]));
}

#[test]
fn many2many_from_a_union_of_collections() {
    let (env, _) = open();
    let seed = seed(&env);

    let tags = env.pool("Tag").unwrap();
    let rust = tags.filter("Name", Operator::Equals, "rust");
    let go = tags.filter("Name", Operator::Equals, "go");
    let channels = env
        .pool("Post")
        .unwrap()
        .filter("Title", Operator::Equals, "Channels");

    for both in [go.union(&rust).unwrap(), rust.union(&go).unwrap()] {
        channels.set("Tags", Value::try_from(&both).unwrap()).unwrap();
        let linked = channels.get("Tags").unwrap();
        assert_eq!(linked.as_ids().map(|ids| ids.len()), Some(2));
        assert_eq!(sorted(&linked), sorted(&Value::Ids(vec![seed.rust, seed.go])));
    }
}

#[test]
fn union_is_a_set() {
    let (env, _) = open();
    let seed = seed(&env);

    let tags = env.pool("Tag").unwrap();
    let rust = tags.filter("Name", Operator::Equals, "rust");
    let go = tags.filter("Name", Operator::Equals, "go");
    let both = rust.union(&go).unwrap();
    assert_eq!(both.ids(), [seed.rust, seed.go]);
    assert_eq!(both.union(&go).unwrap(), both);
    assert_eq!(both.union(&rust).unwrap().len(), 2);

    let users = env.pool("User").unwrap();
    assert!(matches!(
        both.union(&users),
        Err(Error::ModelMismatch { .. })
    ));
}

#[test]
fn unlink_is_scoped_to_the_collection() {
    let (env, _) = open();
    let seed = seed(&env);

    let bob = env
        .pool("User")
        .unwrap()
        .filter("Name", Operator::Equals, "Bob");
    assert_eq!(bob.unlink().unwrap(), 1);
    assert!(bob.load().unwrap().is_empty());
    assert_eq!(env.pool("User").unwrap().search_count().unwrap(), 2);

    let nobody = env
        .pool("User")
        .unwrap()
        .filter("Name", Operator::Equals, "Zed");
    assert_eq!(nobody.unlink().unwrap(), 0);

    // Deleting a tag drops it from every post.
    env.pool("Tag").unwrap().with_ids(&[seed.rust]).unlink().unwrap();
    let lifetimes = env
        .pool("Post")
        .unwrap()
        .filter("Title", Operator::Equals, "Lifetimes");
    assert_eq!(lifetimes.get("Tags").unwrap(), Value::Ids(vec![seed.go]));
}

#[test]
fn stored_field_follows_one2many_changes() {
    let (env, _) = open();
    let seed = seed(&env);

    let users = env.pool("User").unwrap();
    let alice = users.with_ids(&[seed.alice]);
    let bob = users.with_ids(&[seed.bob]);
    assert_eq!(alice.get("PostCount").unwrap(), Value::Int(2));
    assert_eq!(bob.get("PostCount").unwrap(), Value::Int(1));

    let posts = env.pool("Post").unwrap();
    let draft = posts
        .create(FieldMap::new().with("Title", "Drafts").with("User", seed.alice))
        .unwrap();
    assert_eq!(alice.get("PostCount").unwrap(), Value::Int(3));

    draft.set("User", seed.bob).unwrap();
    assert_eq!(alice.get("PostCount").unwrap(), Value::Int(2));
    assert_eq!(bob.get("PostCount").unwrap(), Value::Int(2));

    draft.unlink().unwrap();
    assert_eq!(bob.get("PostCount").unwrap(), Value::Int(1));
    assert_eq!(
        users
            .filter("PostCount", Operator::GreaterOrEqual, 2)
            .search_count()
            .unwrap(),
        1
    );
}

#[test]
fn stored_field_follows_a_path() {
    let (env, _) = open();
    let seed = seed(&env);

    let bob = env.pool("User").unwrap().with_ids(&[seed.bob]);
    assert_eq!(bob.get("DoubleAge").unwrap(), Value::Int(50));

    bob.get_records("Profile").unwrap().set("Age", 26).unwrap();
    assert_eq!(bob.get("DoubleAge").unwrap(), Value::Int(52));

    let profile = env
        .pool("Profile")
        .unwrap()
        .create(FieldMap::new().with("Age", 70))
        .unwrap();
    bob.set("Profile", profile.id().unwrap()).unwrap();
    assert_eq!(bob.get("DoubleAge").unwrap(), Value::Int(140));
    assert_eq!(bob.get("Age").unwrap(), Value::Int(70));
}

#[test]
fn values_are_checked_against_field_types() {
    let (env, _) = open();
    seed(&env);

    let err = env
        .pool("User")
        .unwrap()
        .create(FieldMap::new().with("Name", 12))
        .unwrap_err();
    assert!(matches!(err, Error::Conversion { .. }));
}
