#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use rowset::prelude::*;
use rowset::Row;
use rowset_sqlite::SqliteExecutor;

pub const SCHEMA: &str = r#"
    CREATE TABLE profile (
        id INTEGER PRIMARY KEY,
        age INTEGER,
        bio TEXT
    );
    CREATE TABLE "user" (
        id INTEGER PRIMARY KEY,
        name TEXT,
        email TEXT,
        profile_id INTEGER,
        post_count INTEGER,
        double_age INTEGER
    );
    CREATE TABLE post (
        id INTEGER PRIMARY KEY,
        title TEXT,
        user_id INTEGER
    );
    CREATE TABLE tag (
        id INTEGER PRIMARY KEY,
        name TEXT
    );
    CREATE TABLE post_tag_rel (
        post_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL
    );
"#;

/// Blog models: users with a profile and posts, posts with tags.
pub fn registry() -> Arc<Registry> {
    let registry = Registry::builder()
        .model(
            ModelInfo::new("User")
                .field(FieldInfo::text("Name"))
                .field(FieldInfo::text("Email"))
                .field(FieldInfo::many2one("Profile", "Profile"))
                .field(FieldInfo::one2many("Posts", "Post", "User"))
                .field(FieldInfo::related("Age", "Profile.Age"))
                .field(FieldInfo::text("Greeting").compute(&["Name"], |m| {
                    Ok(m.get("Name")
                        .and_then(Value::as_str)
                        .map_or(Value::Null, |name| Value::from(format!("Hello, {name}"))))
                }))
                .field(
                    FieldInfo::integer("PostCount")
                        .compute(&["Posts"], |m| {
                            let posts = m.get("Posts").and_then(Value::as_ids).unwrap_or_default();
                            Ok(Value::Int(posts.len() as i64))
                        })
                        .stored(true),
                )
                .field(
                    FieldInfo::integer("DoubleAge")
                        .compute(&["Profile.Age"], |m| {
                            Ok(m.get("Profile.Age")
                                .and_then(Value::as_i64)
                                .map_or(Value::Null, |age| Value::Int(age * 2)))
                        })
                        .stored(true),
                ),
        )
        .model(
            ModelInfo::new("Profile")
                .field(FieldInfo::integer("Age"))
                .field(FieldInfo::text("Bio")),
        )
        .model(
            ModelInfo::new("Post")
                .field(FieldInfo::text("Title"))
                .field(FieldInfo::many2one("User", "User"))
                .field(FieldInfo::many2many("Tags", "Tag")),
        )
        .model(ModelInfo::new("Tag").field(FieldInfo::text("Name")))
        .finalize()
        .expect("blog registry");
    Arc::new(registry)
}

/// Counts the queries reaching SQLite.
pub struct Counting {
    inner: SqliteExecutor,
    queries: Rc<Cell<usize>>,
}

impl Executor for Counting {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.queries.set(self.queries.get() + 1);
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.inner.execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.inner.insert(sql, params)
    }
}

pub fn config() -> EnvironmentConfig {
    EnvironmentConfig::default().dialect(Dialect::Sqlite)
}

/// A fresh in-memory database with the blog schema.
pub fn executor() -> (Box<dyn Executor>, Rc<Cell<usize>>) {
    let inner = SqliteExecutor::open_memory().expect("open sqlite memory db");
    inner.execute_batch(SCHEMA).expect("create schema");
    let queries = Rc::new(Cell::new(0));
    let counting = Counting {
        inner,
        queries: Rc::clone(&queries),
    };
    (Box::new(counting), queries)
}

pub fn open() -> (Environment, Rc<Cell<usize>>) {
    let (executor, queries) = executor();
    let env = Environment::with_config(registry(), executor, config()).expect("open environment");
    (env, queries)
}

pub struct Seed {
    pub alice: i64,
    pub bob: i64,
    pub carla: i64,
    pub rust: i64,
    pub go: i64,
}

/// Three users aged 30, 25 and 41; Alice wrote two posts, Bob one.
pub fn seed(env: &Environment) -> Seed {
    let profile = |age: i64| {
        env.create("Profile", FieldMap::new().with("Age", age))
            .expect("create profile")
    };
    let user = |name: &str, profile: i64| {
        env.create(
            "User",
            FieldMap::new()
                .with("Name", name)
                .with("Email", format!("{}@example.com", name.to_lowercase()))
                .with("Profile", profile),
        )
        .expect("create user")
    };
    let alice = user("Alice", profile(30));
    let bob = user("Bob", profile(25));
    let carla = user("Carla", profile(41));

    let rust = env
        .create("Tag", FieldMap::new().with("Name", "rust"))
        .expect("create tag");
    let go = env
        .create("Tag", FieldMap::new().with("Name", "go"))
        .expect("create tag");

    for (title, author, tags) in [
        ("Ownership", alice, vec![rust]),
        ("Lifetimes", alice, vec![rust, go]),
        ("Channels", bob, vec![go]),
    ] {
        env.create(
            "Post",
            FieldMap::new()
                .with("Title", title)
                .with("User", author)
                .with("Tags", tags),
        )
        .expect("create post");
    }

    Seed {
        alice,
        bob,
        carla,
        rust,
        go,
    }
}

pub fn sorted(value: &Value) -> Vec<i64> {
    let mut ids = value.as_ids().unwrap_or_default();
    ids.sort_unstable();
    ids
}
