//! Typed model of the reflected SQL catalog. Instances are created by the
//! reflector, live for the lifetime of one schema snapshot, and are replaced
//! wholesale when the next snapshot is published.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// GraphQL-facing type of a column after type mapping and overrides.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum FieldType {
    BigInt,
    Boolean,
    Bytes,
    Date,
    DateTime,
    Decimal,
    Float,
    Int,
    Json,
    String,
    Time,
    Uuid,
    Vector,
    Year,
}

impl FieldType {
    /// Name of the GraphQL scalar backing this field type on the wire.
    pub fn scalar_name(&self) -> &'static str {
        match self {
            FieldType::BigInt => "BigInt",
            FieldType::Boolean => "Boolean",
            FieldType::Bytes => "Bytes",
            FieldType::Date => "Date",
            // DATETIME/TIMESTAMP travel as RFC3339 strings
            FieldType::DateTime => "String",
            FieldType::Decimal => "Decimal",
            FieldType::Float => "Float",
            FieldType::Int => "Int",
            FieldType::Json => "JSON",
            FieldType::String => "String",
            FieldType::Time => "Time",
            FieldType::Uuid => "UUID",
            FieldType::Vector => "Vector",
            FieldType::Year => "Year",
        }
    }
}

/// Scalar override applied from the type-mapping configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ScalarOverride {
    Boolean,
    Int,
    Uuid,
}

/// One column of a reflected table, identified by `(table, name)`.
#[derive(Clone, Debug, Serialize)]
pub struct Column {
    table: String,
    name: String,
    data_type: String,
    column_type: String,
    nullable: bool,
    default: Option<String>,
    primary_key: bool,
    auto_increment: bool,
    override_scalar: Option<ScalarOverride>,
    #[serde(skip)]
    field_name: String,
}

impl Column {
    pub(crate) fn new(
        table: String,
        name: String,
        data_type: String,
        column_type: String,
        nullable: bool,
        default: Option<String>,
        primary_key: bool,
    ) -> Column {
        Column {
            table,
            name,
            data_type,
            column_type,
            // A primary-key column is never nullable, whatever the catalog
            // happens to report for it.
            nullable: nullable && !primary_key,
            default,
            primary_key,
            auto_increment: false,
            override_scalar: None,
            field_name: String::new(),
        }
    }

    pub(crate) fn with_auto_increment(mut self, auto_increment: bool) -> Column {
        self.auto_increment = auto_increment;
        self
    }

    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn column_type(&self) -> &str {
        &self.column_type
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn default(&self) -> Option<&String> {
        self.default.as_ref()
    }

    pub fn primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn override_scalar(&self) -> Option<ScalarOverride> {
        self.override_scalar
    }

    /// Set once by the reflector's override step; immutable for the lifetime
    /// of the snapshot thereafter.
    pub(crate) fn set_override_scalar(&mut self, o: Option<ScalarOverride>) {
        self.override_scalar = o;
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub(crate) fn set_field_name(&mut self, name: String) {
        self.field_name = name;
    }

    /// The effective GraphQL type of the column after applying the SQL type
    /// mapping and any configured override.
    pub fn effective_type(&self) -> FieldType {
        match self.override_scalar {
            Some(ScalarOverride::Boolean) => FieldType::Boolean,
            Some(ScalarOverride::Int) => FieldType::Int,
            Some(ScalarOverride::Uuid) => FieldType::Uuid,
            None => map_sql_type(&self.data_type, &self.column_type),
        }
    }

    /// Whether the column's storage is binary, which matters for UUID columns
    /// stored as `binary(16)` rather than `char(36)`.
    pub fn binary_storage(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob"
        )
    }
}

/// Maps a SQL data type to the GraphQL field type it is served as.
pub fn map_sql_type(data_type: &str, column_type: &str) -> FieldType {
    let unsigned = column_type.contains("unsigned");
    match data_type {
        "tinyint" => {
            if column_type.starts_with("tinyint(1)") {
                FieldType::Boolean
            } else {
                FieldType::Int
            }
        }
        "smallint" | "mediumint" => FieldType::Int,
        "int" | "integer" => {
            // int unsigned exceeds i32
            if unsigned {
                FieldType::BigInt
            } else {
                FieldType::Int
            }
        }
        "bigint" => FieldType::BigInt,
        "decimal" | "numeric" => FieldType::Decimal,
        "float" | "double" | "real" => FieldType::Float,
        "date" => FieldType::Date,
        "datetime" | "timestamp" => FieldType::DateTime,
        "time" => FieldType::Time,
        "year" => FieldType::Year,
        "json" => FieldType::Json,
        "vector" => FieldType::Vector,
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            FieldType::Bytes
        }
        _ => FieldType::String,
    }
}

/// One index over a table. A covering constraint for a column set S is any
/// index with `unique == true` whose columns are a superset of S.
#[derive(Clone, Debug, Serialize)]
pub struct Index {
    name: Option<String>,
    columns: Vec<String>,
    unique: bool,
}

impl Index {
    pub(crate) fn new(name: Option<String>, columns: Vec<String>, unique: bool) -> Index {
        Index {
            name,
            columns,
            unique,
        }
    }

    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    /// True when this index alone guarantees uniqueness for the column set.
    pub fn covers(&self, columns: &[String]) -> bool {
        self.unique && columns.iter().all(|c| self.columns.contains(c))
    }
}

/// One foreign key. Both column sets must exist in the snapshot or the key is
/// dropped during reflection.
#[derive(Clone, Debug, Serialize)]
pub struct ForeignKey {
    constraint_name: String,
    columns: Vec<String>,
    referenced_table: String,
    referenced_columns: Vec<String>,
}

impl ForeignKey {
    pub(crate) fn new(
        constraint_name: String,
        columns: Vec<String>,
        referenced_table: String,
        referenced_columns: Vec<String>,
    ) -> ForeignKey {
        ForeignKey {
            constraint_name,
            columns,
            referenced_table,
            referenced_columns,
        }
    }

    pub fn constraint_name(&self) -> &str {
        &self.constraint_name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn referenced_table(&self) -> &str {
        &self.referenced_table
    }

    pub fn referenced_columns(&self) -> &[String] {
        &self.referenced_columns
    }
}

/// Orientation of a derived relationship.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum RelationshipKind {
    ManyToOne,
    OneToMany,
    ManyToManyPure,
    ManyToManyAttribute,
    EdgeList,
}

/// A derived relationship between two tables. Recomputed on every snapshot
/// build, never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct Relationship {
    kind: RelationshipKind,
    local_table: String,
    local_columns: Vec<String>,
    remote_table: String,
    remote_columns: Vec<String>,
    junction_table: Option<String>,
    #[serde(skip)]
    field_name: String,
    /// False when the remote columns are not covered by the remote table's
    /// PK or a unique index, degrading lookups to a scan.
    indexed_remote: bool,
}

impl Relationship {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: RelationshipKind,
        local_table: String,
        local_columns: Vec<String>,
        remote_table: String,
        remote_columns: Vec<String>,
        junction_table: Option<String>,
        indexed_remote: bool,
    ) -> Relationship {
        Relationship {
            kind,
            local_table,
            local_columns,
            remote_table,
            remote_columns,
            junction_table,
            field_name: String::new(),
            indexed_remote,
        }
    }

    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    pub fn local_table(&self) -> &str {
        &self.local_table
    }

    pub fn local_columns(&self) -> &[String] {
        &self.local_columns
    }

    pub fn remote_table(&self) -> &str {
        &self.remote_table
    }

    pub fn remote_columns(&self) -> &[String] {
        &self.remote_columns
    }

    pub fn junction_table(&self) -> Option<&String> {
        self.junction_table.as_ref()
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub(crate) fn set_field_name(&mut self, name: String) {
        self.field_name = name;
    }

    pub fn indexed_remote(&self) -> bool {
        self.indexed_remote
    }
}

/// Junction classification attached to a table that links two others.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum JunctionKind {
    Pure,
    Attribute { attribute_columns: Vec<String> },
}

/// The two FKs of a classified junction, ordered alphabetically by referenced
/// table. The ordering is the canonical identity of the edge type.
#[derive(Clone, Debug, Serialize)]
pub struct Junction {
    kind: JunctionKind,
    left: ForeignKey,
    right: ForeignKey,
}

impl Junction {
    pub(crate) fn new(kind: JunctionKind, left: ForeignKey, right: ForeignKey) -> Junction {
        Junction { kind, left, right }
    }

    pub fn kind(&self) -> &JunctionKind {
        &self.kind
    }

    pub fn left(&self) -> &ForeignKey {
        &self.left
    }

    pub fn right(&self) -> &ForeignKey {
        &self.right
    }

    pub fn is_pure(&self) -> bool {
        matches!(self.kind, JunctionKind::Pure)
    }
}

/// One reflected table with its derived relationships and GraphQL names.
#[derive(Clone, Debug, Serialize)]
pub struct Table {
    name: String,
    is_view: bool,
    columns: Vec<Column>,
    indexes: Vec<Index>,
    foreign_keys: Vec<ForeignKey>,
    #[serde(skip)]
    relationships: Vec<Relationship>,
    #[serde(skip)]
    junction: Option<Junction>,
    #[serde(skip)]
    type_name: String,
    #[serde(skip)]
    single_query_name: String,
    #[serde(skip)]
    plural_query_name: String,
}

impl Table {
    pub(crate) fn new(
        name: String,
        is_view: bool,
        columns: Vec<Column>,
        indexes: Vec<Index>,
        foreign_keys: Vec<ForeignKey>,
    ) -> Table {
        Table {
            name,
            is_view,
            columns,
            indexes,
            foreign_keys,
            relationships: Vec::new(),
            junction: None,
            type_name: String::new(),
            single_query_name: String::new(),
            plural_query_name: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_view(&self) -> bool {
        self.is_view
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut Vec<Column> {
        &mut self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub(crate) fn indexes_mut(&mut self) -> &mut Vec<Index> {
        &mut self.indexes
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub(crate) fn foreign_keys_mut(&mut self) -> &mut Vec<ForeignKey> {
        &mut self.foreign_keys
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub(crate) fn relationships_mut(&mut self) -> &mut Vec<Relationship> {
        &mut self.relationships
    }

    pub fn junction(&self) -> Option<&Junction> {
        self.junction.as_ref()
    }

    pub(crate) fn set_junction(&mut self, junction: Option<Junction>) {
        self.junction = junction;
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub(crate) fn set_type_name(&mut self, name: String) {
        self.type_name = name;
    }

    pub fn single_query_name(&self) -> &str {
        &self.single_query_name
    }

    pub(crate) fn set_single_query_name(&mut self, name: String) {
        self.single_query_name = name;
    }

    pub fn plural_query_name(&self) -> &str {
        &self.plural_query_name
    }

    pub(crate) fn set_plural_query_name(&mut self, name: String) {
        self.plural_query_name = name;
    }

    /// Primary-key columns in declaration order.
    pub fn primary_key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key()).collect()
    }

    pub fn primary_key_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary_key())
            .map(|c| c.name().to_string())
            .collect()
    }

    /// True when the column set is covered by the PK or any unique index.
    /// Covering means the constraint's columns are a superset of the set.
    pub fn unique_covering(&self, columns: &[String]) -> bool {
        if columns.is_empty() {
            return false;
        }
        let pk = self.primary_key_names();
        if !pk.is_empty() && columns.iter().all(|c| pk.contains(c)) {
            return true;
        }
        self.indexes.iter().any(|ix| ix.covers(columns))
    }

    /// Single-column unique indexes usable as singular lookup arguments.
    pub fn single_column_unique_indexes(&self) -> Vec<&Index> {
        self.indexes
            .iter()
            .filter(|ix| ix.unique() && ix.columns().len() == 1)
            .collect()
    }
}

/// An immutable, fingerprinted view of the upstream schema mapped to GraphQL
/// types. Published atomically by the snapshot manager; all readers observe a
/// consistent view for the lifetime of one request.
#[derive(Clone, Debug)]
pub struct Snapshot {
    tables: Vec<Table>,
    by_name: HashMap<String, usize>,
    by_type_name: HashMap<String, usize>,
    naming_applied: bool,
    built_at: DateTime<Utc>,
    fingerprint: String,
    role: Option<String>,
}

impl Snapshot {
    pub(crate) fn new(
        tables: Vec<Table>,
        naming_applied: bool,
        fingerprint: String,
        role: Option<String>,
    ) -> Snapshot {
        let by_name = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();
        let by_type_name = tables
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.type_name().is_empty())
            .map(|(i, t)| (t.type_name().to_string(), i))
            .collect();
        Snapshot {
            tables,
            by_name,
            by_type_name,
            naming_applied,
            built_at: Utc::now(),
            fingerprint,
            role,
        }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    pub fn table_by_type_name(&self, type_name: &str) -> Option<&Table> {
        self.by_type_name.get(type_name).map(|&i| &self.tables[i])
    }

    pub fn naming_applied(&self) -> bool {
        self.naming_applied
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn role(&self) -> Option<&String> {
        self.role.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::{map_sql_type, Column, FieldType, Index, Table};

    /// Passes if a PK column reported nullable by the catalog is normalized
    #[test]
    fn pk_never_nullable() {
        let c = Column::new(
            "users".to_string(),
            "id".to_string(),
            "bigint".to_string(),
            "bigint(20)".to_string(),
            true,
            None,
            true,
        );

        assert!(!c.nullable());
        assert!(c.primary_key());
    }

    /// Passes if tinyint(1) maps to Boolean and wider tinyints to Int
    #[test]
    fn tinyint_mapping() {
        assert_eq!(FieldType::Boolean, map_sql_type("tinyint", "tinyint(1)"));
        assert_eq!(FieldType::Int, map_sql_type("tinyint", "tinyint(4)"));
        assert_eq!(
            FieldType::BigInt,
            map_sql_type("int", "int(10) unsigned")
        );
        assert_eq!(FieldType::BigInt, map_sql_type("bigint", "bigint(20)"));
    }

    /// Passes if a unique index covering a column set is detected through
    /// either the PK or a secondary unique index
    #[test]
    fn unique_covering() {
        let columns = vec![
            Column::new(
                "user_roles".to_string(),
                "user_id".to_string(),
                "bigint".to_string(),
                "bigint(20)".to_string(),
                false,
                None,
                true,
            ),
            Column::new(
                "user_roles".to_string(),
                "role_id".to_string(),
                "bigint".to_string(),
                "bigint(20)".to_string(),
                false,
                None,
                true,
            ),
        ];
        let t = Table::new(
            "user_roles".to_string(),
            false,
            columns,
            vec![Index::new(
                Some("uq_pair".to_string()),
                vec!["user_id".to_string(), "role_id".to_string()],
                true,
            )],
            Vec::new(),
        );

        assert!(t.unique_covering(&["user_id".to_string(), "role_id".to_string()]));
        assert!(t.unique_covering(&["user_id".to_string()]));
        assert!(!t.unique_covering(&["missing".to_string()]));
        assert!(!t.unique_covering(&[]));
    }
}
