//! Queries the SQL catalog (`information_schema`) and assembles raw
//! [`Table`] values for the reflector pipeline.

use crate::engine::database::{QueryFacility, Row};
use crate::engine::reflect::model::{Column, ForeignKey, Index, Table};
use crate::engine::value::Value;
use crate::error::Error;
use log::trace;
use std::collections::HashMap;

const TABLES_SQL: &str = "SELECT TABLE_NAME AS table_name, TABLE_TYPE AS table_type \
     FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = ? \
     ORDER BY TABLE_NAME";

const COLUMNS_SQL: &str = "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name, \
            DATA_TYPE AS data_type, COLUMN_TYPE AS column_type, \
            IS_NULLABLE AS is_nullable, COLUMN_DEFAULT AS column_default, \
            COLUMN_KEY AS column_key, EXTRA AS extra \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? \
     ORDER BY TABLE_NAME, ORDINAL_POSITION";

const INDEXES_SQL: &str = "SELECT TABLE_NAME AS table_name, INDEX_NAME AS index_name, \
            NON_UNIQUE AS non_unique, COLUMN_NAME AS column_name \
     FROM information_schema.STATISTICS \
     WHERE TABLE_SCHEMA = ? \
     ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX";

const FOREIGN_KEYS_SQL: &str = "SELECT TABLE_NAME AS table_name, CONSTRAINT_NAME AS constraint_name, \
            COLUMN_NAME AS column_name, REFERENCED_TABLE_NAME AS referenced_table_name, \
            REFERENCED_COLUMN_NAME AS referenced_column_name \
     FROM information_schema.KEY_COLUMN_USAGE \
     WHERE TABLE_SCHEMA = ? AND REFERENCED_TABLE_NAME IS NOT NULL \
     ORDER BY TABLE_NAME, CONSTRAINT_NAME, ORDINAL_POSITION";

fn row_string(row: &Row, key: &str) -> Result<String, Error> {
    match row.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Bytes(b)) => Ok(String::from_utf8_lossy(b).into_owned()),
        other => Err(Error::TypeConversionFailed {
            src: format!("catalog column {}: {:?}", key, other),
            dst: "String".to_string(),
        }),
    }
}

fn row_opt_string(row: &Row, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Bytes(b)) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}

fn row_bool_from_int(row: &Row, key: &str) -> bool {
    matches!(
        row.get(key),
        Some(Value::Int64(n)) if *n != 0
    ) || matches!(
        row.get(key),
        Some(Value::UInt64(n)) if *n != 0
    )
}

/// Enumerates tables, columns, indexes, and foreign keys for the effective
/// database. Views are included only when `include_views` is set. Tables come
/// back ordered by name with their columns in declaration order.
pub(crate) async fn load_tables(
    db: &dyn QueryFacility,
    database: &str,
    include_views: bool,
) -> Result<Vec<Table>, Error> {
    trace!("load_tables -- database: {}", database);
    let db_arg = vec![Value::String(database.to_string())];

    let table_rows = db
        .fetch_rows(TABLES_SQL, db_arg.clone())
        .await
        .map_err(catalog_error)?;
    let column_rows = db
        .fetch_rows(COLUMNS_SQL, db_arg.clone())
        .await
        .map_err(catalog_error)?;
    let index_rows = db
        .fetch_rows(INDEXES_SQL, db_arg.clone())
        .await
        .map_err(catalog_error)?;
    let fk_rows = db
        .fetch_rows(FOREIGN_KEYS_SQL, db_arg)
        .await
        .map_err(catalog_error)?;

    let mut columns: HashMap<String, Vec<Column>> = HashMap::new();
    for row in &column_rows {
        let table = row_string(row, "table_name")?;
        let nullable = row_string(row, "is_nullable")?.eq_ignore_ascii_case("yes");
        let primary = row_string(row, "column_key")
            .map(|k| k.eq_ignore_ascii_case("pri"))
            .unwrap_or(false);
        let auto_increment = row_opt_string(row, "extra")
            .map(|e| e.to_lowercase().contains("auto_increment"))
            .unwrap_or(false);
        let column = Column::new(
            table.clone(),
            row_string(row, "column_name")?,
            row_string(row, "data_type")?.to_lowercase(),
            row_string(row, "column_type")?.to_lowercase(),
            nullable,
            row_opt_string(row, "column_default"),
            primary,
        )
        .with_auto_increment(auto_increment);
        columns.entry(table).or_default().push(column);
    }

    // STATISTICS yields one row per (index, position); fold into ordered
    // column lists keyed by (table, index name).
    let mut index_order: Vec<(String, String)> = Vec::new();
    let mut index_parts: HashMap<(String, String), (bool, Vec<String>)> = HashMap::new();
    for row in &index_rows {
        let table = row_string(row, "table_name")?;
        let name = row_string(row, "index_name")?;
        let unique = !row_bool_from_int(row, "non_unique");
        let key = (table, name);
        let entry = index_parts.entry(key.clone()).or_insert_with(|| {
            index_order.push(key.clone());
            (unique, Vec::new())
        });
        entry.1.push(row_string(row, "column_name")?);
    }
    let mut indexes: HashMap<String, Vec<Index>> = HashMap::new();
    for key in index_order {
        let (unique, cols) = index_parts.remove(&key).expect("index recorded above");
        let (table, name) = key;
        indexes
            .entry(table)
            .or_default()
            .push(Index::new(Some(name), cols, unique));
    }

    // KEY_COLUMN_USAGE likewise: one row per constraint column.
    let mut fk_order: Vec<(String, String)> = Vec::new();
    let mut fk_parts: HashMap<(String, String), (String, Vec<String>, Vec<String>)> =
        HashMap::new();
    for row in &fk_rows {
        let table = row_string(row, "table_name")?;
        let name = row_string(row, "constraint_name")?;
        let key = (table, name);
        let entry = fk_parts.entry(key.clone()).or_insert_with(|| {
            fk_order.push(key.clone());
            (String::new(), Vec::new(), Vec::new())
        });
        entry.0 = row_string(row, "referenced_table_name")?;
        entry.1.push(row_string(row, "column_name")?);
        entry.2.push(row_string(row, "referenced_column_name")?);
    }
    let mut foreign_keys: HashMap<String, Vec<ForeignKey>> = HashMap::new();
    for key in fk_order {
        let (referenced, local, remote) = fk_parts.remove(&key).expect("fk recorded above");
        let (table, name) = key;
        foreign_keys
            .entry(table)
            .or_default()
            .push(ForeignKey::new(name, local, referenced, remote));
    }

    let mut tables = Vec::with_capacity(table_rows.len());
    for row in &table_rows {
        let name = row_string(row, "table_name")?;
        let is_view = row_string(row, "table_type")?.eq_ignore_ascii_case("view");
        if is_view && !include_views {
            continue;
        }
        tables.push(Table::new(
            name.clone(),
            is_view,
            columns.remove(&name).unwrap_or_default(),
            indexes.remove(&name).unwrap_or_default(),
            foreign_keys.remove(&name).unwrap_or_default(),
        ));
    }

    Ok(tables)
}

fn catalog_error(e: Error) -> Error {
    match e {
        Error::DatabaseQueryFailed { source } => Error::CatalogQueryFailed { source },
        other => other,
    }
}
