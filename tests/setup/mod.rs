//! Shared fixtures: a fake SQL facility that serves a canned
//! `information_schema` catalog, so reflection runs end to end without a
//! database container.

// not every test binary exercises every fixture
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Mutex;
use tigql::engine::database::{ExecOutcome, QueryFacility, Row};
use tigql::engine::value::Value;
use tigql::Error;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn s(v: &str) -> Value {
    Value::String(v.to_string())
}

/// One canned catalog: table, column, index, and foreign-key rows shaped the
/// way the introspection queries return them.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub tables: Vec<Row>,
    pub columns: Vec<Row>,
    pub indexes: Vec<Row>,
    pub foreign_keys: Vec<Row>,
}

impl Catalog {
    pub fn table(mut self, name: &str, table_type: &str) -> Self {
        self.tables.push(row(&[
            ("table_name", s(name)),
            ("table_type", s(table_type)),
        ]));
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn column(
        mut self,
        table: &str,
        name: &str,
        data_type: &str,
        column_type: &str,
        nullable: bool,
        key: &str,
        extra: &str,
    ) -> Self {
        self.columns.push(row(&[
            ("table_name", s(table)),
            ("column_name", s(name)),
            ("data_type", s(data_type)),
            ("column_type", s(column_type)),
            ("is_nullable", s(if nullable { "YES" } else { "NO" })),
            ("column_default", Value::Null),
            ("column_key", s(key)),
            ("extra", s(extra)),
        ]));
        self
    }

    pub fn index(mut self, table: &str, name: &str, unique: bool, columns: &[&str]) -> Self {
        for c in columns {
            self.indexes.push(row(&[
                ("table_name", s(table)),
                ("index_name", s(name)),
                ("non_unique", Value::Int64(if unique { 0 } else { 1 })),
                ("column_name", s(c)),
            ]));
        }
        self
    }

    pub fn foreign_key(
        mut self,
        table: &str,
        constraint: &str,
        column: &str,
        referenced_table: &str,
        referenced_column: &str,
    ) -> Self {
        self.foreign_keys.push(row(&[
            ("table_name", s(table)),
            ("constraint_name", s(constraint)),
            ("column_name", s(column)),
            ("referenced_table_name", s(referenced_table)),
            ("referenced_column_name", s(referenced_column)),
        ]));
        self
    }
}

/// Serves the canned catalog through the same seam the MySQL session
/// implements, recording every statement for assertions.
pub struct FakeDb {
    catalog: Catalog,
    pub statements: Mutex<Vec<String>>,
}

impl FakeDb {
    pub fn new(catalog: Catalog) -> FakeDb {
        FakeDb {
            catalog,
            statements: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl QueryFacility for FakeDb {
    async fn fetch_rows(&self, sql: &str, _args: Vec<Value>) -> Result<Vec<Row>, Error> {
        self.statements.lock().unwrap().push(sql.to_string());
        if sql.contains("information_schema.TABLES") {
            Ok(self.catalog.tables.clone())
        } else if sql.contains("information_schema.COLUMNS") {
            Ok(self.catalog.columns.clone())
        } else if sql.contains("information_schema.STATISTICS") {
            Ok(self.catalog.indexes.clone())
        } else if sql.contains("information_schema.KEY_COLUMN_USAGE") {
            Ok(self.catalog.foreign_keys.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn execute(&self, sql: &str, _args: Vec<Value>) -> Result<ExecOutcome, Error> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(ExecOutcome::default())
    }

    async fn begin(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn commit(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn rollback(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn release(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// The canonical fixture: users and roles linked by a pure junction, posts
/// referencing users, and one view.
pub fn blog_catalog() -> Catalog {
    Catalog::default()
        .table("posts", "BASE TABLE")
        .table("roles", "BASE TABLE")
        .table("user_roles", "BASE TABLE")
        .table("users", "BASE TABLE")
        .table("v_user_posts", "VIEW")
        .column("users", "id", "bigint", "bigint(20)", false, "PRI", "auto_increment")
        .column("users", "email", "varchar", "varchar(255)", false, "UNI", "")
        .column("users", "is_active", "tinyint", "tinyint(1)", false, "", "")
        .column("roles", "id", "bigint", "bigint(20)", false, "PRI", "auto_increment")
        .column("roles", "name", "varchar", "varchar(64)", false, "", "")
        .column(
            "user_roles",
            "user_id",
            "bigint",
            "bigint(20)",
            false,
            "PRI",
            "",
        )
        .column(
            "user_roles",
            "role_id",
            "bigint",
            "bigint(20)",
            false,
            "PRI",
            "",
        )
        .column("posts", "id", "bigint", "bigint(20)", false, "PRI", "auto_increment")
        .column("posts", "author_id", "bigint", "bigint(20)", false, "", "")
        .column("posts", "created_at", "datetime", "datetime", false, "", "")
        .column("v_user_posts", "id", "bigint", "bigint(20)", false, "", "")
        .index("users", "PRIMARY", true, &["id"])
        .index("users", "uq_email", true, &["email"])
        .index("roles", "PRIMARY", true, &["id"])
        .index("user_roles", "PRIMARY", true, &["user_id", "role_id"])
        .index("posts", "PRIMARY", true, &["id"])
        .index("posts", "ix_author", false, &["author_id"])
        .index("posts", "ix_created", false, &["created_at"])
        .foreign_key("user_roles", "fk_ur_user", "user_id", "users", "id")
        .foreign_key("user_roles", "fk_ur_role", "role_id", "roles", "id")
        .foreign_key("posts", "fk_posts_author", "author_id", "users", "id")
}
