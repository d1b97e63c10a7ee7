//! Per-request batching of repeated foreign-key lookups. Each request builds
//! its own [`Batcher`]; there is no global dataloader state. Keys coalesce on
//! `(table, key columns, key values)` and resolve through one batched query.

use crate::engine::database::{QueryFacility, Row};
use crate::engine::plan::{self, BATCH_PARENT_ID, BATCH_PARENT_PREFIX};
use crate::engine::reflect::model::Snapshot;
use crate::engine::value::Value;
use crate::error::Error;
use async_trait::async_trait;
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;
use ultra_batch::{Batcher, Cache, Fetcher};

/// One hashable component of a batched lookup key.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum KeyValue {
    Int(i64),
    UInt(u64),
    Str(String),
    Bytes(Vec<u8>),
}

impl KeyValue {
    pub fn from_value(v: &Value) -> Result<KeyValue, Error> {
        match v {
            Value::Int64(i) => Ok(KeyValue::Int(*i)),
            Value::UInt64(u) => Ok(KeyValue::UInt(*u)),
            Value::String(s) => Ok(KeyValue::Str(s.clone())),
            Value::Bytes(b) => Ok(KeyValue::Bytes(b.clone())),
            Value::Bool(b) => Ok(KeyValue::Int(*b as i64)),
            other => Err(Error::TypeConversionFailed {
                src: format!("{:?}", other),
                dst: "batch key".to_string(),
            }),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            KeyValue::Int(i) => Value::Int64(*i),
            KeyValue::UInt(u) => Value::UInt64(*u),
            KeyValue::Str(s) => Value::String(s.clone()),
            KeyValue::Bytes(b) => Value::Bytes(b.clone()),
        }
    }

    fn coerced(&self) -> String {
        match self {
            KeyValue::Int(i) => i.to_string(),
            KeyValue::UInt(u) => u.to_string(),
            KeyValue::Str(s) => s.clone(),
            KeyValue::Bytes(b) => base64::encode(b),
        }
    }
}

/// Key for one row lookup: the target table, the columns matched, and the
/// matched values.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RowLoaderKey {
    table: String,
    key_columns: Vec<String>,
    key: Vec<KeyValue>,
}

impl RowLoaderKey {
    pub fn new(table: String, key_columns: Vec<String>, key: Vec<KeyValue>) -> RowLoaderKey {
        RowLoaderKey {
            table,
            key_columns,
            key,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn coerced_key(&self) -> Vec<String> {
        self.key.iter().map(|k| k.coerced()).collect()
    }
}

/// Fetches batched single-row lookups for many-to-one traversal.
pub struct RowLoader {
    session: Arc<dyn QueryFacility>,
    snapshot: Arc<Snapshot>,
}

impl RowLoader {
    pub fn new(session: Arc<dyn QueryFacility>, snapshot: Arc<Snapshot>) -> RowLoader {
        RowLoader { session, snapshot }
    }
}

#[async_trait]
impl Fetcher for RowLoader {
    type Key = RowLoaderKey;
    type Value = Option<Row>;
    type Error = Error;

    async fn fetch(
        &self,
        keys: &[RowLoaderKey],
        values: &mut Cache<'_, RowLoaderKey, Option<Row>>,
    ) -> Result<(), Error> {
        trace!("RowLoader::fetch called -- {} keys", keys.len());

        // one batched statement per (table, key columns) group
        let mut groups: HashMap<(String, Vec<String>), Vec<&RowLoaderKey>> = HashMap::new();
        for key in keys {
            groups
                .entry((key.table.clone(), key.key_columns.clone()))
                .or_default()
                .push(key);
        }

        for ((table_name, key_columns), group) in groups {
            let table = self
                .snapshot
                .table(&table_name)
                .ok_or_else(|| Error::SchemaItemNotFound {
                    name: table_name.clone(),
                })?;
            let parent_keys: Vec<Vec<Value>> = group
                .iter()
                .map(|k| k.key.iter().map(KeyValue::to_value).collect())
                .collect();
            let batch = plan::children_by_fk_batch(table, &key_columns, &parent_keys)?;
            let (sql, args) = batch.into_parts();
            let rows = self.session.fetch_rows(&sql, args).await?;

            // regroup rows under their originating key via the aliased
            // parent columns
            let mut by_coerced: HashMap<Vec<String>, Row> = HashMap::new();
            for mut row in rows {
                let coerced = if key_columns.len() == 1 {
                    vec![row
                        .remove(BATCH_PARENT_ID)
                        .unwrap_or(Value::Null)
                        .to_cursor_string()?]
                } else {
                    let mut parts = Vec::with_capacity(key_columns.len());
                    for i in 0..key_columns.len() {
                        let alias = format!("{}{}", BATCH_PARENT_PREFIX, i);
                        parts.push(
                            row.remove(alias.as_str())
                                .unwrap_or(Value::Null)
                                .to_cursor_string()?,
                        );
                    }
                    parts
                };
                by_coerced.insert(coerced, row);
            }
            for key in group {
                values.insert((*key).clone(), by_coerced.remove(&key.coerced_key()));
            }
        }

        Ok(())
    }
}

/// The per-request batching context.
pub struct RowBatcher {
    batcher: Batcher<RowLoader>,
}

impl RowBatcher {
    pub fn new(session: Arc<dyn QueryFacility>, snapshot: Arc<Snapshot>) -> RowBatcher {
        RowBatcher {
            batcher: Batcher::build(RowLoader::new(session, snapshot)).finish(),
        }
    }

    /// Loads one row, coalescing with every other in-flight lookup in this
    /// request's resolver tree.
    pub async fn load(&self, key: RowLoaderKey) -> Result<Option<Row>, Error> {
        self.batcher
            .load(key.clone())
            .await
            .map_err(|e| Error::TypeConversionFailed {
                src: format!("batched lookup for {}: {}", key.table(), e),
                dst: "row".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyValue, RowLoaderKey};
    use crate::engine::value::Value;

    /// Passes if key values preserve integer identity without float coercion
    #[test]
    fn key_value_identity() {
        let a = KeyValue::from_value(&Value::Int64(5188146770730811493)).unwrap();
        let b = KeyValue::from_value(&Value::Int64(5188146770730811493)).unwrap();

        assert_eq!(a, b);
        assert_eq!("5188146770730811493", a.coerced());
    }

    /// Passes if keys with the same table but different columns do not
    /// collide
    #[test]
    fn keys_distinguish_columns() {
        let by_id = RowLoaderKey::new(
            "users".to_string(),
            vec!["id".to_string()],
            vec![KeyValue::Int(1)],
        );
        let by_email = RowLoaderKey::new(
            "users".to_string(),
            vec!["email".to_string()],
            vec![KeyValue::Int(1)],
        );

        assert_ne!(by_id, by_email);
    }
}
