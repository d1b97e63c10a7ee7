//! Round-trip and validation tests for the opaque identifier codec, driven
//! through the public encode/decode surface.

mod setup;

use setup::{blog_catalog, init, FakeDb};
use tigql::engine::config::SchemaConfig;
use tigql::engine::reflect::build_snapshot;
use tigql::engine::schema::ident::{
    decode_cursor, decode_node_id, encode_cursor, encode_node_id, parse_pk_value, Cursor,
    Direction,
};
use tigql::engine::value::Value;
use tigql::Error;

/// Passes if a node ID for a reflected bigint PK survives decode and typed
/// conversion with no precision loss
#[tokio::test]
async fn node_id_against_reflected_column() {
    init();
    let db = FakeDb::new(blog_catalog());
    let snapshot = build_snapshot(&db, "app", &SchemaConfig::default(), None)
        .await
        .unwrap();
    let users = snapshot.table("users").unwrap();
    let pk = users.primary_key_columns()[0];

    let id = encode_node_id("User", &[Value::Int64(5188146770730811493)]).unwrap();
    let (type_name, raw) = decode_node_id(&id).unwrap();

    assert_eq!("User", type_name);
    assert_eq!(
        Value::Int64(5188146770730811493),
        parse_pk_value(&raw[0], pk).unwrap()
    );
}

/// Passes if composite keys keep their component order
#[test]
fn composite_node_id() {
    let id = encode_node_id(
        "UserRole",
        &[Value::Int64(3), Value::Int64(9)],
    )
    .unwrap();
    let (type_name, raw) = decode_node_id(&id).unwrap();

    assert_eq!("UserRole", type_name);
    assert_eq!(2, raw.len());
    assert_eq!(Some(3), raw[0].as_i64());
    assert_eq!(Some(9), raw[1].as_i64());
}

/// Passes if the scenario cursor round-trips and validates against its query
/// context
#[test]
fn cursor_scenario_round_trip() {
    let cursor = Cursor::new(
        "Post".to_string(),
        "createdAt_databaseId".to_string(),
        vec![Direction::Desc, Direction::Asc],
        vec!["2024-01-15T10:30:00Z".to_string(), "7".to_string()],
    );

    let encoded = encode_cursor(&cursor).unwrap();
    let decoded = decode_cursor(&encoded).unwrap();

    assert_eq!("Post", decoded.type_name());
    assert_eq!("createdAt_databaseId", decoded.order_key());
    assert_eq!(&[Direction::Desc, Direction::Asc], decoded.directions());
    assert_eq!(
        &["2024-01-15T10:30:00Z".to_string(), "7".to_string()][..],
        decoded.values()
    );
    assert!(decoded
        .validate(
            "Post",
            "createdAt_databaseId",
            &[Direction::Desc, Direction::Asc]
        )
        .is_ok());
}

/// Passes if a cursor submitted to the wrong query fails with a mismatch
#[test]
fn cursor_wrong_context() {
    let cursor = Cursor::new(
        "Post".to_string(),
        "createdAt_databaseId".to_string(),
        vec![Direction::Desc, Direction::Asc],
        vec!["2024-01-15T10:30:00Z".to_string(), "7".to_string()],
    );

    let result = cursor.validate("Post", "databaseId", &[Direction::Asc]);

    assert!(matches!(result, Err(Error::CursorMismatched { .. })));
}

/// Passes if version-1 cursors are rejected naming the expected version
#[test]
fn cursor_v1_rejected() {
    let v1 = base64::encode(r#"{"v":1,"t":"Post","k":"databaseId","d":["ASC"],"vals":["5"]}"#);

    match decode_cursor(&v1) {
        Err(Error::CursorNotParsed { reason }) => assert!(reason.contains("expected v2")),
        other => panic!("expected v1 rejection, got {:?}", other),
    }
}
