//! End-to-end reflection tests over the canned catalog: classification,
//! relationship derivation, naming, filtering, and fingerprint behavior.

mod setup;

use setup::{blog_catalog, init, FakeDb};
use tigql::engine::config::SchemaConfig;
use tigql::engine::reflect::build_snapshot;
use tigql::engine::reflect::model::{JunctionKind, RelationshipKind};

fn schema_config(yaml: &str) -> SchemaConfig {
    serde_yaml::from_str(yaml).expect("schema config fixture")
}

/// Passes if the junction fixture classifies user_roles as a pure junction
/// with its FKs ordered alphabetically by referenced table
#[tokio::test]
async fn junction_classification() {
    init();
    let db = FakeDb::new(blog_catalog());
    let snapshot = build_snapshot(&db, "app", &SchemaConfig::default(), None)
        .await
        .unwrap();

    let junction = snapshot.table("user_roles").unwrap().junction().unwrap();
    assert_eq!(&JunctionKind::Pure, junction.kind());
    assert_eq!("roles", junction.left().referenced_table());
    assert_eq!("users", junction.right().referenced_table());
}

/// Passes if relationships derive with the expected orientations: posts get
/// a many-to-one, users a one-to-many plus a many-to-many through the
/// junction
#[tokio::test]
async fn relationship_derivation() {
    init();
    let db = FakeDb::new(blog_catalog());
    let snapshot = build_snapshot(&db, "app", &SchemaConfig::default(), None)
        .await
        .unwrap();

    let posts = snapshot.table("posts").unwrap();
    assert!(posts
        .relationships()
        .iter()
        .any(|r| r.kind() == RelationshipKind::ManyToOne && r.remote_table() == "users"));

    let users = snapshot.table("users").unwrap();
    assert!(users
        .relationships()
        .iter()
        .any(|r| r.kind() == RelationshipKind::OneToMany && r.remote_table() == "posts"));
    assert!(users.relationships().iter().any(|r| {
        r.kind() == RelationshipKind::ManyToManyPure
            && r.remote_table() == "roles"
            && r.junction_table() == Some(&"user_roles".to_string())
    }));
}

/// Passes if naming produces unique PascalCase types, camelCase queries, and
/// the databaseId rename for PK columns named id
#[tokio::test]
async fn naming_applied() {
    init();
    let db = FakeDb::new(blog_catalog());
    let snapshot = build_snapshot(&db, "app", &SchemaConfig::default(), None)
        .await
        .unwrap();

    let users = snapshot.table("users").unwrap();
    assert_eq!("User", users.type_name());
    assert_eq!("user", users.single_query_name());
    assert_eq!("users", users.plural_query_name());
    assert_eq!("databaseId", users.column("id").unwrap().field_name());
    assert_eq!("isActive", users.column("is_active").unwrap().field_name());
    assert!(snapshot.naming_applied());

    let mut type_names: Vec<&str> = snapshot.tables().iter().map(|t| t.type_name()).collect();
    let before = type_names.len();
    type_names.sort();
    type_names.dedup();
    assert_eq!(before, type_names.len());
}

/// Passes if views are excluded by default and included when enabled
#[tokio::test]
async fn view_scanning() {
    init();
    let db = FakeDb::new(blog_catalog());
    let snapshot = build_snapshot(&db, "app", &SchemaConfig::default(), None)
        .await
        .unwrap();
    assert!(snapshot.table("v_user_posts").is_none());

    let cfg = schema_config("filter:\n  scan_views_enabled: true\n");
    let db = FakeDb::new(blog_catalog());
    let snapshot = build_snapshot(&db, "app", &cfg, None).await.unwrap();
    assert!(snapshot.table("v_user_posts").is_some());
}

/// Passes if denying a table drops it and every foreign key that pointed at
/// it, without growing any other table's column set
#[tokio::test]
async fn filter_monotonicity() {
    init();
    let db = FakeDb::new(blog_catalog());
    let full = build_snapshot(&db, "app", &SchemaConfig::default(), None)
        .await
        .unwrap();

    let cfg = schema_config("filter:\n  deny_tables: [\"users\"]\n");
    let db = FakeDb::new(blog_catalog());
    let reduced = build_snapshot(&db, "app", &cfg, None).await.unwrap();

    assert!(reduced.table("users").is_none());
    let posts = reduced.table("posts").unwrap();
    assert!(posts.foreign_keys().is_empty());
    assert!(posts.relationships().is_empty());

    for table in reduced.tables() {
        let full_table = full.table(table.name()).unwrap();
        assert!(
            table.columns().len() <= full_table.columns().len(),
            "{} grew columns after filtering",
            table.name()
        );
    }
}

/// Passes if a tinyint(1) column maps to Boolean by default and to Int under
/// an override
#[tokio::test]
async fn tinyint_overrides() {
    init();
    let db = FakeDb::new(blog_catalog());
    let snapshot = build_snapshot(&db, "app", &SchemaConfig::default(), None)
        .await
        .unwrap();
    let col = snapshot.table("users").unwrap().column("is_active").unwrap();
    assert_eq!("Boolean", col.effective_type().scalar_name());

    let cfg = schema_config("overrides:\n  tinyint1_int_columns: [\"users.is_active\"]\n");
    let db = FakeDb::new(blog_catalog());
    let snapshot = build_snapshot(&db, "app", &cfg, None).await.unwrap();
    let col = snapshot.table("users").unwrap().column("is_active").unwrap();
    assert_eq!("Int", col.effective_type().scalar_name());
}

/// Passes if identical catalogs produce identical fingerprints, and config
/// or catalog changes move the fingerprint
#[tokio::test]
async fn fingerprint_stability() {
    init();
    let a = build_snapshot(
        &FakeDb::new(blog_catalog()),
        "app",
        &SchemaConfig::default(),
        None,
    )
    .await
    .unwrap();
    let b = build_snapshot(
        &FakeDb::new(blog_catalog()),
        "app",
        &SchemaConfig::default(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(a.fingerprint(), b.fingerprint());

    let cfg = schema_config("filter:\n  deny_tables: [\"posts\"]\n");
    let c = build_snapshot(&FakeDb::new(blog_catalog()), "app", &cfg, None)
        .await
        .unwrap();
    assert_ne!(a.fingerprint(), c.fingerprint());

    let grown = blog_catalog().column(
        "posts",
        "subtitle",
        "varchar",
        "varchar(255)",
        true,
        "",
        "",
    );
    let d = build_snapshot(&FakeDb::new(grown), "app", &SchemaConfig::default(), None)
        .await
        .unwrap();
    assert_ne!(a.fingerprint(), d.fingerprint());
}

/// Passes if the role marker is carried on role-scoped snapshots
#[tokio::test]
async fn role_marker() {
    init();
    let db = FakeDb::new(blog_catalog());
    let snapshot = build_snapshot(
        &db,
        "app",
        &SchemaConfig::default(),
        Some("reporting_ro".to_string()),
    )
    .await
    .unwrap();

    assert_eq!(Some(&"reporting_ro".to_string()), snapshot.role());
}
