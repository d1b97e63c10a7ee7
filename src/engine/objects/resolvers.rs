//! Auto-generated resolvers: node lookups, singular queries, Relay
//! connections, relationship traversal, and transactional mutations. Every
//! resolver works from the snapshot captured at request start and the
//! request's single SQL session.

use crate::engine::context::GraphQLContext;
use crate::engine::loader::{KeyValue, RowLoaderKey};
use crate::engine::objects::{Input, Node};
use crate::engine::plan::{self, OrderSpec, DISTANCE_ALIAS};
use crate::engine::reflect::model::{
    Column, FieldType, Relationship, RelationshipKind, Table,
};
use crate::engine::schema::ident::{self, Cursor, Direction};
use crate::engine::schema::scalars::{self, Vector};
use crate::engine::schema::{Info, NodeType, Property, PropertyKind, NODE_UNION_TYPE};
use crate::engine::value::Value;
use crate::error::Error;
use juniper::{Arguments, ExecutionResult, Executor, FieldError, LookAheadMethods, ID};
use log::{debug, trace};
use std::collections::HashMap;
use std::convert::TryFrom;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 500;
const EDGE_LIST_LIMIT: i64 = 1000;

/// Entry point for every field in the schema.
pub(crate) async fn resolve_field(
    node: &Node,
    info: &Info,
    field_name: &str,
    arguments: &Arguments<'_>,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    trace!(
        "resolve_field -- type: {}, field: {}",
        info.name(),
        field_name
    );
    let type_def = info.type_def()?;
    let prop = type_def.property(field_name)?;
    let ctx = executor.context();

    match prop.kind() {
        PropertyKind::Scalar => resolve_scalar(node, type_def, prop),
        PropertyKind::Object => resolve_object(node, info, prop, executor).await,
        PropertyKind::NodeId => {
            let table = lookup_table_for_type(ctx, type_def)?;
            let id = node.id(table)?;
            Ok(juniper::Value::scalar(id))
        }
        PropertyKind::SchemaVersion => Ok(juniper::Value::scalar(
            ctx.snapshot().fingerprint().to_string(),
        )),
        PropertyKind::NodeLookup => resolve_node_lookup(info, arguments, executor).await,
        PropertyKind::SingleQuery { table } => {
            resolve_single_query(info, table, arguments, executor).await
        }
        PropertyKind::ConnectionQuery { table } => {
            let table = lookup_table(ctx, table)?;
            resolve_connection(info, table, arguments, None, None, executor).await
        }
        PropertyKind::Relationship { table, index } => {
            resolve_relationship(node, info, table, *index, arguments, executor).await
        }
        PropertyKind::InsertMutation { table } => {
            resolve_insert(info, table, arguments, executor).await
        }
        PropertyKind::UpdateMutation { table } => {
            resolve_update(info, table, arguments, executor).await
        }
        PropertyKind::DeleteMutation { table } => {
            resolve_delete(table, arguments, executor).await
        }
    }
}

fn lookup_table<'a>(ctx: &'a GraphQLContext, name: &str) -> Result<&'a Table, Error> {
    ctx.snapshot()
        .table(name)
        .ok_or_else(|| Error::SchemaItemNotFound {
            name: name.to_string(),
        })
}

fn lookup_table_for_type<'a>(
    ctx: &'a GraphQLContext,
    type_def: &NodeType,
) -> Result<&'a Table, Error> {
    let table_name = type_def
        .table()
        .ok_or_else(|| Error::SchemaItemNotFound {
            name: format!("table for {}", type_def.type_name()),
        })?;
    lookup_table(ctx, table_name)
}

/// Renders an already-materialized scalar field value onto the wire.
fn resolve_scalar(node: &Node, type_def: &NodeType, prop: &Property) -> ExecutionResult {
    let value = node.field(prop.name()).cloned().unwrap_or(Value::Null);
    if matches!(value, Value::Null) {
        if prop.required() {
            return Err(FieldError::from(Error::SchemaItemNotFound {
                name: format!("{}::{}", type_def.type_name(), prop.name()),
            }));
        }
        return Ok(juniper::Value::null());
    }
    render_scalar(prop.type_name(), &value).map_err(FieldError::from)
}

fn render_scalar(type_name: &str, value: &Value) -> Result<juniper::Value, Error> {
    let conversion = |dst: &str| Error::TypeConversionFailed {
        src: format!("{:?}", value),
        dst: dst.to_string(),
    };
    Ok(match type_name {
        "Boolean" => juniper::Value::scalar(bool::try_from(value.clone())?),
        "Int" | "NonNegativeInt" => juniper::Value::scalar(i32::try_from(value.clone())?),
        "Float" => juniper::Value::scalar(f64::try_from(value.clone())?),
        "BigInt" | "Decimal" | "Date" | "Time" | "Year" => {
            juniper::Value::scalar(value.to_cursor_string()?)
        }
        "Bytes" => match value {
            Value::Bytes(b) => juniper::Value::scalar(base64::encode(b)),
            Value::String(s) => juniper::Value::scalar(s.clone()),
            _ => return Err(conversion("Bytes")),
        },
        "UUID" => match value {
            Value::Bytes(b) => {
                let parsed =
                    scalars::Uuid::from_bytes(b).ok_or_else(|| conversion("UUID"))?;
                juniper::Value::scalar(parsed.to_wire())
            }
            Value::String(s) => juniper::Value::scalar(s.to_lowercase()),
            _ => return Err(conversion("UUID")),
        },
        "Vector" => match value {
            Value::String(s) => {
                let parsed = Vector::parse_str(s).ok_or_else(|| conversion("Vector"))?;
                juniper::Value::list(
                    parsed.values().iter().map(|f| juniper::Value::scalar(*f)).collect(),
                )
            }
            Value::Array(items) => juniper::Value::list(
                items
                    .iter()
                    .map(|i| f64::try_from(i.clone()).map(juniper::Value::scalar))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            _ => return Err(conversion("Vector")),
        },
        "JSON" => {
            let json = serde_json::Value::try_from(value.clone())?;
            render_json(&json)
        }
        _ => {
            // String, ID, and DateTime-backed String fields
            match value {
                Value::String(s) => juniper::Value::scalar(s.clone()),
                other => juniper::Value::scalar(other.to_cursor_string()?),
            }
        }
    })
}

fn render_json(v: &serde_json::Value) -> juniper::Value {
    match v {
        serde_json::Value::Null => juniper::Value::null(),
        serde_json::Value::Bool(b) => juniper::Value::scalar(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    juniper::Value::scalar(i as i32)
                } else {
                    juniper::Value::scalar(i.to_string())
                }
            } else if let Some(f) = n.as_f64() {
                juniper::Value::scalar(f)
            } else {
                juniper::Value::scalar(n.to_string())
            }
        }
        serde_json::Value::String(s) => juniper::Value::scalar(s.clone()),
        serde_json::Value::Array(a) => juniper::Value::list(a.iter().map(render_json).collect()),
        serde_json::Value::Object(o) => {
            let mut obj = juniper::Object::with_capacity(o.len());
            for (k, val) in o {
                obj.add_field(k.clone(), render_json(val));
            }
            juniper::Value::Object(obj)
        }
    }
}

/// Resolves a nested object field from the node's materialized structure.
async fn resolve_object(
    node: &Node,
    info: &Info,
    prop: &Property,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    let child_info = Info::new(prop.type_name().to_string(), info.type_defs());
    match node.field(prop.name()) {
        Some(Value::Map(map)) => {
            let child = Node::new(prop.type_name().to_string(), map.clone());
            executor.resolve_async(&child_info, &child).await
        }
        Some(Value::Array(items)) => {
            let children = items
                .iter()
                .map(|item| match item {
                    Value::Map(map) => Ok(Node::new(prop.type_name().to_string(), map.clone())),
                    other => Err(Error::TypeConversionFailed {
                        src: format!("{:?}", other),
                        dst: prop.type_name().to_string(),
                    }),
                })
                .collect::<Result<Vec<Node>, Error>>()?;
            executor.resolve_async(&child_info, &children).await
        }
        _ if !prop.required() => Ok(juniper::Value::null()),
        _ => Err(FieldError::from(Error::SchemaItemNotFound {
            name: format!("{}::{}", info.name(), prop.name()),
        })),
    }
}

/// `node(id: ID!)`: decode, plan a PK lookup, resolve into the union.
async fn resolve_node_lookup(
    info: &Info,
    arguments: &Arguments<'_>,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    let ctx = executor.context();
    let id: ID = arguments.get("id").ok_or_else(|| Error::InputItemNotFound {
        name: "id".to_string(),
    })?;
    let (type_name, raw) = ident::decode_node_id(&id)?;
    let table = ctx
        .snapshot()
        .table_by_type_name(&type_name)
        .ok_or_else(|| Error::NodeIdNotParsed {
            reason: format!("unknown type {}", type_name),
        })?;
    let pk_columns = table.primary_key_columns();
    if raw.len() != pk_columns.len() {
        return Err(FieldError::from(Error::NodeIdNotParsed {
            reason: format!(
                "{} key components for {} primary key columns",
                raw.len(),
                pk_columns.len()
            ),
        }));
    }
    let pk_values = raw
        .iter()
        .zip(pk_columns.iter())
        .map(|(r, c)| ident::parse_pk_value(r, c))
        .collect::<Result<Vec<Value>, Error>>()?;

    let (sql, args) = plan::single_by_pk(table, pk_values)?.into_parts();
    let rows = ctx.session().fetch_rows(&sql, args).await?;
    let found = rows
        .into_iter()
        .next()
        .map(|row| Node::from_row(table, row))
        .transpose()?;

    let union_info = Info::new(NODE_UNION_TYPE.to_string(), info.type_defs());
    executor.resolve_async(&union_info, &found).await
}

/// Singular lookup by PK or by one single-column unique index.
async fn resolve_single_query(
    info: &Info,
    table_name: &str,
    arguments: &Arguments<'_>,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    let ctx = executor.context();
    let table = lookup_table(ctx, table_name)?;

    let pk_columns = table.primary_key_columns();
    let pk_provided: Vec<(usize, Value)> = pk_columns
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            arguments
                .get::<Value>(c.field_name())
                .map(|v| (i, v))
        })
        .collect();

    let plan = if pk_provided.len() == pk_columns.len() && !pk_columns.is_empty() {
        let pk_values = pk_provided
            .into_iter()
            .map(|(i, v)| coerce_input(pk_columns[i], v))
            .collect::<Result<Vec<Value>, Error>>()?;
        plan::single_by_pk(table, pk_values)?
    } else {
        // fall back to exactly one unique-column argument
        let mut unique_hit: Option<(&Column, Value)> = None;
        for index in table.single_column_unique_indexes() {
            if let Some(column) = table.column(&index.columns()[0]) {
                if let Some(v) = arguments.get::<Value>(column.field_name()) {
                    if unique_hit.is_some() {
                        return Err(FieldError::from(Error::InputItemNotFound {
                            name: "exactly one lookup argument".to_string(),
                        }));
                    }
                    unique_hit = Some((column, v));
                }
            }
        }
        match unique_hit {
            Some((column, v)) => {
                let bound = coerce_input(column, v)?;
                plan::single_by_unique(table, column.name(), bound)
            }
            None => {
                return Err(FieldError::from(Error::InputItemNotFound {
                    name: "exactly one lookup argument".to_string(),
                }))
            }
        }
    };

    let (sql, args) = plan.into_parts();
    let rows = ctx.session().fetch_rows(&sql, args).await?;
    let found = rows
        .into_iter()
        .next()
        .map(|row| Node::from_row(table, row))
        .transpose()?;
    let child_info = Info::new(table.type_name().to_string(), info.type_defs());
    executor.resolve_async(&child_info, &found).await
}

/// Parses the orderBy argument into the order spec: the primary sort column
/// plus the PK tie-breaker ascending. Only the PK and indexed columns are
/// accepted so every page stays seekable.
fn parse_order_by(table: &Table, order_by: Option<String>) -> Result<OrderSpec, Error> {
    let pk_fields: Vec<String> = table
        .primary_key_columns()
        .iter()
        .map(|c| c.field_name().to_string())
        .collect();
    let pk_cols: Vec<(String, Direction)> = table
        .primary_key_names()
        .into_iter()
        .map(|c| (c, Direction::Asc))
        .collect();

    let spec = match order_by {
        None => OrderSpec::new(pk_fields.join("_"), pk_cols),
        Some(raw) => {
            let (field, dir) = raw
                .rsplit_once('_')
                .and_then(|(f, d)| Direction::parse(d).map(|dir| (f.to_string(), dir)))
                .ok_or_else(|| Error::ScalarNotParsed {
                    type_name: "orderBy".to_string(),
                    value: raw.clone(),
                })?;
            let column = table
                .columns()
                .iter()
                .find(|c| c.field_name() == field)
                .ok_or_else(|| Error::ScalarNotParsed {
                    type_name: "orderBy".to_string(),
                    value: raw.clone(),
                })?;
            let seekable = column.primary_key()
                || table
                    .indexes()
                    .iter()
                    .any(|ix| ix.columns().first() == Some(&column.name().to_string()));
            if !seekable {
                return Err(Error::ScalarNotParsed {
                    type_name: "orderBy".to_string(),
                    value: format!("{} is not indexed", raw),
                });
            }
            let mut columns = vec![(column.name().to_string(), dir)];
            let mut key_parts = vec![field];
            for (pk_col, pk_dir) in pk_cols {
                if pk_col != columns[0].0 {
                    columns.push((pk_col.clone(), pk_dir));
                    if let Some(c) = table.column(&pk_col) {
                        key_parts.push(c.field_name().to_string());
                    }
                }
            }
            OrderSpec::new(key_parts.join("_"), columns)
        }
    };
    Ok(spec)
}

fn page_size(arguments: &Arguments<'_>) -> i64 {
    let requested = arguments
        .get::<scalars::NonNegativeInt>("first")
        .map(|n| n.get() as i64)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    requested.min(MAX_PAGE_SIZE)
}

/// Binds a cursor component against the column it seeks on.
fn bind_cursor_value(column: Option<&Column>, raw: &str) -> Result<Value, Error> {
    let effective = column.map(|c| c.effective_type());
    Ok(match effective {
        Some(FieldType::Int) | Some(FieldType::BigInt) => {
            if let Ok(i) = raw.parse::<i64>() {
                Value::Int64(i)
            } else if let Ok(u) = raw.parse::<u64>() {
                Value::UInt64(u)
            } else {
                return Err(Error::CursorNotParsed {
                    reason: format!("{} is not an integer", raw),
                });
            }
        }
        Some(FieldType::Float) => Value::Float64(raw.parse().map_err(|_| {
            Error::CursorNotParsed {
                reason: format!("{} is not a float", raw),
            }
        })?),
        Some(FieldType::DateTime) => Value::String(ident::sql_datetime(raw).map_err(|_| {
            Error::CursorNotParsed {
                reason: format!("{} is not a timestamp", raw),
            }
        })?),
        Some(FieldType::Bytes) | Some(FieldType::Uuid) if column.map(|c| c.binary_storage()).unwrap_or(false) => {
            match scalars::Uuid::parse_str(raw) {
                Some(u) => Value::Bytes(u.as_bytes().to_vec()),
                None => Value::Bytes(base64::decode(raw).map_err(|_| {
                    Error::CursorNotParsed {
                        reason: format!("{} is not base64", raw),
                    }
                })?),
            }
        }
        _ => Value::String(raw.to_string()),
    })
}

struct PageFetch {
    rows: Vec<HashMap<String, Value>>,
    has_next: bool,
    has_previous: bool,
}

/// Relay connection resolution: parse paging arguments, plan the page, and
/// materialize edges with their cursors.
async fn resolve_connection(
    info: &Info,
    table: &Table,
    arguments: &Arguments<'_>,
    parent: Option<(&[String], Vec<Value>)>,
    junction: Option<(&Relationship, &Table)>,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    let ctx = executor.context();
    let first = page_size(arguments);
    let after = arguments.get::<String>("after");
    let nearest = arguments.get::<Vector>("nearest");

    if let Some(query_vector) = nearest {
        return resolve_vector_connection(info, table, arguments, query_vector, first, after, executor)
            .await;
    }

    let order = parse_order_by(table, arguments.get::<String>("orderBy"))?;
    let cursor_values = match &after {
        None => None,
        Some(encoded) => {
            let cursor = ident::decode_cursor(encoded)?;
            cursor.validate(table.type_name(), order.key(), &order.directions())?;
            Some(bind_cursor_values(table, &order, cursor.values())?)
        }
    };

    let plan = match junction {
        Some((rel, junction_table)) => {
            let vals = parent
                .as_ref()
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Error::SchemaItemNotFound {
                    name: "junction parent".to_string(),
                })?;
            plan::junction_page(table, rel, junction_table, vals, &order, cursor_values, first)?
        }
        None => plan::connection_page(
            table,
            &order,
            cursor_values,
            first,
            parent.as_ref().map(|(c, v)| (*c, v.clone())),
        )?,
    };

    let (sql, args) = plan.into_parts();
    let mut rows = ctx.session().fetch_rows(&sql, args).await?;
    let has_next = rows.len() as i64 > first;
    rows.truncate(first as usize);
    let fetch = PageFetch {
        rows,
        has_next,
        has_previous: after.is_some(),
    };

    let total = if wants_total_count(executor) {
        // many-to-many counts go through the junction, everything else
        // straight off the target table
        let count_plan = match junction {
            Some((rel, junction_table)) => junction_table
                .foreign_keys()
                .iter()
                .find(|fk| fk.referenced_table() == rel.local_table())
                .and_then(|fk| {
                    parent
                        .as_ref()
                        .map(|(_, vals)| plan::count(junction_table, Some((fk.columns(), vals.clone()))))
                }),
            None => Some(plan::count(
                table,
                parent.as_ref().map(|(c, v)| (*c, v.clone())),
            )),
        };
        match count_plan {
            Some(count_plan) => {
                let (sql, args) = count_plan.into_parts();
                let rows = ctx.session().fetch_rows(&sql, args).await?;
                rows.first()
                    .and_then(|r| r.get("__count"))
                    .map(|v| i64::try_from(v.clone()))
                    .transpose()?
                    .unwrap_or(0)
            }
            None => fetch.rows.len() as i64,
        }
    } else {
        fetch.rows.len() as i64
    };

    let connection = build_connection(table, &order, fetch, total)?;
    let child_info = Info::new(
        format!("{}Connection", table.type_name()),
        info.type_defs(),
    );
    executor.resolve_async(&child_info, &connection).await
}

fn wants_total_count(executor: &Executor<'_, '_, GraphQLContext>) -> bool {
    executor
        .look_ahead()
        .children()
        .iter()
        .any(|c| c.field_name() == "totalCount")
}

fn bind_cursor_values(
    table: &Table,
    order: &OrderSpec,
    raw: &[String],
) -> Result<Vec<Value>, Error> {
    if raw.len() != order.columns().len() {
        return Err(Error::CursorNotParsed {
            reason: format!(
                "cursor carries {} values for {} sort columns",
                raw.len(),
                order.columns().len()
            ),
        });
    }
    order
        .columns()
        .iter()
        .zip(raw.iter())
        .map(|((col, _), s)| bind_cursor_value(table.column(col), s))
        .collect()
}

/// Assembles the connection node: edges with cursors, page info, total count.
fn build_connection(
    table: &Table,
    order: &OrderSpec,
    fetch: PageFetch,
    total: i64,
) -> Result<Node, Error> {
    let mut edges = Vec::with_capacity(fetch.rows.len());
    let mut first_cursor: Option<String> = None;
    let mut last_cursor: Option<String> = None;

    for row in fetch.rows {
        let node = Node::from_row(table, row)?;
        let components = order
            .columns()
            .iter()
            .map(|(col, _)| {
                let field = table
                    .column(col)
                    .map(|c| c.field_name().to_string())
                    .unwrap_or_else(|| col.clone());
                node.field(&field)
                    .cloned()
                    .unwrap_or(Value::Null)
                    .to_cursor_string()
            })
            .collect::<Result<Vec<String>, Error>>()?;
        let cursor = ident::encode_cursor(&Cursor::new(
            table.type_name().to_string(),
            order.key().to_string(),
            order.directions(),
            components,
        ))?;
        if first_cursor.is_none() {
            first_cursor = Some(cursor.clone());
        }
        last_cursor = Some(cursor.clone());

        let mut edge = HashMap::new();
        edge.insert("node".to_string(), Value::Map(node.fields().clone()));
        edge.insert("cursor".to_string(), Value::String(cursor));
        edges.push(Value::Map(edge));
    }

    let mut page_info = HashMap::new();
    page_info.insert("hasNextPage".to_string(), Value::Bool(fetch.has_next));
    page_info.insert(
        "hasPreviousPage".to_string(),
        Value::Bool(fetch.has_previous),
    );
    page_info.insert(
        "startCursor".to_string(),
        first_cursor.map(Value::String).unwrap_or(Value::Null),
    );
    page_info.insert(
        "endCursor".to_string(),
        last_cursor.map(Value::String).unwrap_or(Value::Null),
    );

    let mut fields = HashMap::new();
    fields.insert("edges".to_string(), Value::Array(edges));
    fields.insert("pageInfo".to_string(), Value::Map(page_info));
    fields.insert("totalCount".to_string(), Value::Int64(total));

    Ok(Node::new(format!("{}Connection", table.type_name()), fields))
}

/// Vector search connection: distance-ordered page whose cursor leads with
/// the computed distance.
async fn resolve_vector_connection(
    info: &Info,
    table: &Table,
    arguments: &Arguments<'_>,
    query_vector: Vector,
    first: i64,
    after: Option<String>,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    let ctx = executor.context();
    let vector_column = match arguments.get::<String>("nearestColumn") {
        Some(field) => table
            .columns()
            .iter()
            .find(|c| c.field_name() == field && c.effective_type() == FieldType::Vector)
            .ok_or_else(|| Error::ScalarNotParsed {
                type_name: "nearestColumn".to_string(),
                value: field,
            })?,
        None => table
            .columns()
            .iter()
            .find(|c| c.effective_type() == FieldType::Vector)
            .ok_or_else(|| Error::SchemaItemNotFound {
                name: format!("vector column on {}", table.name()),
            })?,
    };

    let pk_fields: Vec<String> = table
        .primary_key_columns()
        .iter()
        .map(|c| c.field_name().to_string())
        .collect();
    let order_key = format!("distance_{}", pk_fields.join("_"));
    let directions: Vec<Direction> = vec![Direction::Asc; pk_fields.len()];

    let cursor_values = match &after {
        None => None,
        Some(encoded) => {
            let cursor = ident::decode_cursor(encoded)?;
            cursor.validate(table.type_name(), &order_key, &directions)?;
            let raw = cursor.values();
            let mut bound = Vec::with_capacity(raw.len());
            // leading value is the computed distance
            bound.push(Value::Float64(raw[0].parse().map_err(|_| {
                Error::CursorNotParsed {
                    reason: format!("{} is not a distance", raw[0]),
                }
            })?));
            for (pk, s) in table.primary_key_columns().iter().zip(raw[1..].iter()) {
                bound.push(bind_cursor_value(Some(pk), s)?);
            }
            Some(bound)
        }
    };

    let serialized = serde_json::to_string(query_vector.values()).map_err(|e| {
        Error::TypeConversionFailed {
            src: format!("query vector: {}", e),
            dst: "JSON".to_string(),
        }
    })?;
    let plan = plan::vector_search_page(
        table,
        vector_column.name(),
        serialized,
        cursor_values,
        first,
    )?;
    let (sql, args) = plan.into_parts();
    let mut rows = ctx.session().fetch_rows(&sql, args).await?;
    let has_next = rows.len() as i64 > first;
    rows.truncate(first as usize);

    // distance-led cursors: value list is one longer than the direction list
    let mut edges = Vec::with_capacity(rows.len());
    let mut first_cursor = None;
    let mut last_cursor = None;
    for row in rows {
        let distance = row
            .get(DISTANCE_ALIAS)
            .cloned()
            .unwrap_or(Value::Null)
            .to_cursor_string()?;
        let node = Node::from_row(table, row)?;
        let mut components = vec![distance];
        for field in &pk_fields {
            components.push(
                node.field(field)
                    .cloned()
                    .unwrap_or(Value::Null)
                    .to_cursor_string()?,
            );
        }
        let cursor = ident::encode_cursor(&Cursor::new(
            table.type_name().to_string(),
            order_key.clone(),
            directions.clone(),
            components,
        ))?;
        if first_cursor.is_none() {
            first_cursor = Some(cursor.clone());
        }
        last_cursor = Some(cursor.clone());
        let mut edge = HashMap::new();
        edge.insert("node".to_string(), Value::Map(node.fields().clone()));
        edge.insert("cursor".to_string(), Value::String(cursor));
        edges.push(Value::Map(edge));
    }

    let mut page_info = HashMap::new();
    page_info.insert("hasNextPage".to_string(), Value::Bool(has_next));
    page_info.insert("hasPreviousPage".to_string(), Value::Bool(after.is_some()));
    page_info.insert(
        "startCursor".to_string(),
        first_cursor.map(Value::String).unwrap_or(Value::Null),
    );
    page_info.insert(
        "endCursor".to_string(),
        last_cursor.map(Value::String).unwrap_or(Value::Null),
    );

    let total = edges.len() as i64;
    let mut fields = HashMap::new();
    fields.insert("edges".to_string(), Value::Array(edges));
    fields.insert("pageInfo".to_string(), Value::Map(page_info));
    fields.insert("totalCount".to_string(), Value::Int64(total));

    let connection = Node::new(format!("{}Connection", table.type_name()), fields);
    let child_info = Info::new(
        format!("{}Connection", table.type_name()),
        info.type_defs(),
    );
    executor.resolve_async(&child_info, &connection).await
}

/// Resolves a derived relationship field.
async fn resolve_relationship(
    node: &Node,
    info: &Info,
    table_name: &str,
    index: usize,
    arguments: &Arguments<'_>,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    let ctx = executor.context();
    let table = lookup_table(ctx, table_name)?;
    let rel = table
        .relationships()
        .get(index)
        .ok_or_else(|| Error::SchemaItemNotFound {
            name: format!("{} relationship {}", table_name, index),
        })?;
    let remote = lookup_table(ctx, rel.remote_table())?;

    // local key values come off the already-resolved node
    let mut local_values = Vec::with_capacity(rel.local_columns().len());
    for col in rel.local_columns() {
        let field = table
            .column(col)
            .map(|c| c.field_name().to_string())
            .unwrap_or_else(|| col.clone());
        local_values.push(node.field(&field).cloned().unwrap_or(Value::Null));
    }
    if local_values.iter().any(|v| matches!(v, Value::Null)) {
        // a null FK resolves to null or an empty collection
        return match rel.kind() {
            RelationshipKind::ManyToOne => Ok(juniper::Value::null()),
            RelationshipKind::EdgeList => {
                let child_info = Info::new(remote.type_name().to_string(), info.type_defs());
                executor.resolve_async(&child_info, &Vec::<Node>::new()).await
            }
            _ => {
                let empty = build_connection(
                    remote,
                    &OrderSpec::pk_ascending(remote),
                    PageFetch {
                        rows: Vec::new(),
                        has_next: false,
                        has_previous: false,
                    },
                    0,
                )?;
                let child_info = Info::new(
                    format!("{}Connection", remote.type_name()),
                    info.type_defs(),
                );
                executor.resolve_async(&child_info, &empty).await
            }
        };
    }

    match rel.kind() {
        RelationshipKind::ManyToOne => {
            let keys = local_values
                .iter()
                .map(KeyValue::from_value)
                .collect::<Result<Vec<KeyValue>, Error>>()?;
            let key = RowLoaderKey::new(
                remote.name().to_string(),
                rel.remote_columns().to_vec(),
                keys,
            );
            let row = ctx.batcher().load(key).await?;
            let child_info = Info::new(remote.type_name().to_string(), info.type_defs());
            match row {
                Some(row) => {
                    let child = Node::from_row(remote, row)?;
                    executor.resolve_async(&child_info, &Some(child)).await
                }
                None => {
                    debug!(
                        "dangling foreign key: {}.{:?} -> {}",
                        table.name(),
                        rel.local_columns(),
                        remote.name()
                    );
                    executor.resolve_async(&child_info, &None::<Node>).await
                }
            }
        }
        RelationshipKind::OneToMany => {
            resolve_connection(
                info,
                remote,
                arguments,
                Some((rel.remote_columns(), local_values)),
                None,
                executor,
            )
            .await
        }
        RelationshipKind::ManyToManyPure | RelationshipKind::ManyToManyAttribute => {
            let junction_name = rel.junction_table().cloned().unwrap_or_default();
            let junction_table = lookup_table(ctx, &junction_name)?;
            resolve_connection(
                info,
                remote,
                arguments,
                Some((rel.local_columns(), local_values)),
                Some((rel, junction_table)),
                executor,
            )
            .await
        }
        RelationshipKind::EdgeList => {
            let order = OrderSpec::pk_ascending(remote);
            let plan = plan::connection_page(
                remote,
                &order,
                None,
                EDGE_LIST_LIMIT,
                Some((rel.remote_columns(), local_values)),
            )?;
            let (sql, args) = plan.into_parts();
            let mut rows = ctx.session().fetch_rows(&sql, args).await?;
            rows.truncate(EDGE_LIST_LIMIT as usize);
            let children = rows
                .into_iter()
                .map(|row| Node::from_row(remote, row))
                .collect::<Result<Vec<Node>, Error>>()?;
            let child_info = Info::new(remote.type_name().to_string(), info.type_defs());
            executor.resolve_async(&child_info, &children).await
        }
    }
}

/// Coerces one input value for binding against a column.
fn coerce_input(column: &Column, value: Value) -> Result<Value, Error> {
    let reject = || Error::ScalarNotParsed {
        type_name: column.effective_type().scalar_name().to_string(),
        value: format!("{:?}", value),
    };
    if matches!(value, Value::Null) {
        return Ok(Value::Null);
    }
    Ok(match column.effective_type() {
        FieldType::Int | FieldType::BigInt => match &value {
            Value::Int64(_) | Value::UInt64(_) => value,
            Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    Value::Int64(i)
                } else if let Ok(u) = s.parse::<u64>() {
                    Value::UInt64(u)
                } else {
                    return Err(reject());
                }
            }
            _ => return Err(reject()),
        },
        FieldType::Boolean => match &value {
            Value::Bool(_) => value,
            Value::Int64(i) => Value::Bool(*i != 0),
            _ => return Err(reject()),
        },
        FieldType::Float => Value::Float64(f64::try_from(value.clone()).map_err(|_| reject())?),
        FieldType::Decimal => match &value {
            Value::String(s) => Value::String(
                scalars::Decimal::parse_str(s)
                    .ok_or_else(reject)?
                    .as_str()
                    .to_string(),
            ),
            Value::Int64(i) => Value::String(i.to_string()),
            Value::UInt64(u) => Value::String(u.to_string()),
            Value::Float64(f) if f.is_finite() => Value::String(f.to_string()),
            _ => return Err(reject()),
        },
        FieldType::Date => match &value {
            Value::String(s) => {
                Value::String(scalars::Date::parse_str(s).ok_or_else(reject)?.to_wire())
            }
            _ => return Err(reject()),
        },
        FieldType::DateTime => match &value {
            Value::String(s) => match ident::sql_datetime(s) {
                Ok(converted) => Value::String(converted),
                // already in SQL form
                Err(_) if chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .is_ok() =>
                {
                    Value::String(s.clone())
                }
                Err(e) => return Err(e),
            },
            _ => return Err(reject()),
        },
        FieldType::Time => match &value {
            Value::String(s) => {
                Value::String(scalars::Time::parse_str(s).ok_or_else(reject)?.to_wire())
            }
            Value::Int64(i) => Value::String(
                scalars::Time::parse_str(&i.to_string())
                    .ok_or_else(reject)?
                    .to_wire(),
            ),
            _ => return Err(reject()),
        },
        FieldType::Year => match &value {
            Value::String(s) => {
                let y = scalars::Year::parse_str(s).ok_or_else(reject)?;
                Value::String(y.to_wire())
            }
            Value::Int64(i) => {
                let y = scalars::Year::from_int(*i).ok_or_else(reject)?;
                Value::String(y.to_wire())
            }
            _ => return Err(reject()),
        },
        FieldType::Bytes => match &value {
            Value::Bytes(_) => value,
            Value::String(s) => Value::Bytes(
                scalars::Bytes::parse_str(s)
                    .ok_or_else(reject)?
                    .as_slice()
                    .to_vec(),
            ),
            _ => return Err(reject()),
        },
        FieldType::Uuid => match &value {
            Value::String(s) => {
                let parsed = scalars::Uuid::parse_str(s).ok_or_else(reject)?;
                if column.binary_storage() {
                    Value::Bytes(parsed.as_bytes().to_vec())
                } else {
                    Value::String(parsed.to_wire())
                }
            }
            Value::Bytes(b) if b.len() == 16 => value,
            _ => return Err(reject()),
        },
        FieldType::Vector => match &value {
            Value::Array(items) => {
                let floats = items
                    .iter()
                    .map(|i| f64::try_from(i.clone()))
                    .collect::<Result<Vec<f64>, Error>>()
                    .map_err(|_| reject())?;
                let vec = Vector::new(floats).ok_or_else(reject)?;
                Value::String(serde_json::to_string(vec.values()).map_err(|_| reject())?)
            }
            Value::String(s) => {
                let vec = Vector::parse_str(s).ok_or_else(reject)?;
                Value::String(serde_json::to_string(vec.values()).map_err(|_| reject())?)
            }
            _ => return Err(reject()),
        },
        FieldType::Json => match &value {
            Value::Map(_) | Value::Array(_) => value,
            Value::String(s) => {
                scalars::Json::parse_str(s).ok_or_else(reject)?;
                value
            }
            _ => value,
        },
        FieldType::String => match &value {
            Value::String(_) => value,
            _ => Value::String(value.to_cursor_string().map_err(|_| reject())?),
        },
    })
}

/// Extracts the mutation input map, coerced per column.
fn input_columns(
    table: &Table,
    input: &Input,
) -> Result<(Vec<String>, Vec<Value>), Error> {
    let map = match input.value() {
        Value::Map(m) => m,
        other => {
            return Err(Error::TypeConversionFailed {
                src: format!("{:?}", other),
                dst: "input object".to_string(),
            })
        }
    };
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for column in table.columns() {
        if let Some(v) = map.get(column.field_name()) {
            columns.push(column.name().to_string());
            values.push(coerce_input(column, v.clone())?);
        }
    }
    Ok((columns, values))
}

fn pk_values_from_args(table: &Table, arguments: &Arguments<'_>) -> Result<Vec<Value>, Error> {
    table
        .primary_key_columns()
        .iter()
        .map(|c| {
            let v = arguments
                .get::<Value>(c.field_name())
                .ok_or_else(|| Error::InputItemNotFound {
                    name: c.field_name().to_string(),
                })?;
            coerce_input(c, v)
        })
        .collect()
}

async fn read_back(
    ctx: &GraphQLContext,
    table: &Table,
    pk_values: Vec<Value>,
) -> Result<Option<Node>, Error> {
    let (sql, args) = plan::single_by_pk(table, pk_values)?.into_parts();
    let rows = ctx.session().fetch_rows(&sql, args).await?;
    rows.into_iter()
        .next()
        .map(|row| Node::from_row(table, row))
        .transpose()
}

/// INSERT, then re-read the row inside the same transaction.
async fn resolve_insert(
    info: &Info,
    table_name: &str,
    arguments: &Arguments<'_>,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    let ctx = executor.context();
    let table = lookup_table(ctx, table_name)?;
    ctx.ensure_transaction().await?;

    let input: Input = arguments
        .get("input")
        .ok_or_else(|| Error::InputItemNotFound {
            name: "input".to_string(),
        })?;
    let (columns, values) = input_columns(table, &input)?;
    let (sql, args) = plan::insert(table, &columns, values.clone()).into_parts();
    let outcome = ctx.session().execute(&sql, args).await?;

    // locate the new row: auto-increment key, or the PK supplied in input
    let pk_columns = table.primary_key_columns();
    let pk_values: Vec<Value> = if pk_columns.len() == 1 && pk_columns[0].auto_increment() {
        match outcome.last_insert_id() {
            Some(id) => vec![Value::UInt64(id)],
            None => {
                // key provided explicitly despite auto-increment
                pk_from_input(table, &columns, &values)?
            }
        }
    } else {
        pk_from_input(table, &columns, &values)?
    };

    let node = read_back(ctx, table, pk_values)
        .await?
        .ok_or_else(|| Error::RowNotFound {
            type_name: table.type_name().to_string(),
        })?;
    let child_info = Info::new(table.type_name().to_string(), info.type_defs());
    executor.resolve_async(&child_info, &node).await
}

fn pk_from_input(
    table: &Table,
    columns: &[String],
    values: &[Value],
) -> Result<Vec<Value>, Error> {
    table
        .primary_key_names()
        .iter()
        .map(|pk| {
            columns
                .iter()
                .position(|c| c == pk)
                .map(|i| values[i].clone())
                .ok_or_else(|| Error::InputItemNotFound {
                    name: pk.to_string(),
                })
        })
        .collect()
}

/// UPDATE by primary key, then re-read.
async fn resolve_update(
    info: &Info,
    table_name: &str,
    arguments: &Arguments<'_>,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    let ctx = executor.context();
    let table = lookup_table(ctx, table_name)?;
    ctx.ensure_transaction().await?;

    let pk_values = pk_values_from_args(table, arguments)?;
    let input: Input = arguments
        .get("input")
        .ok_or_else(|| Error::InputItemNotFound {
            name: "input".to_string(),
        })?;
    let (columns, values) = input_columns(table, &input)?;
    if !columns.is_empty() {
        let (sql, args) =
            plan::update(table, &columns, values, pk_values.clone())?.into_parts();
        ctx.session().execute(&sql, args).await?;
    }

    let node = read_back(ctx, table, pk_values)
        .await?
        .ok_or_else(|| Error::RowNotFound {
            type_name: table.type_name().to_string(),
        })?;
    let child_info = Info::new(table.type_name().to_string(), info.type_defs());
    executor.resolve_async(&child_info, &node).await
}

/// DELETE by primary key, returning the number of rows removed.
async fn resolve_delete(
    table_name: &str,
    arguments: &Arguments<'_>,
    executor: &Executor<'_, '_, GraphQLContext>,
) -> ExecutionResult {
    let ctx = executor.context();
    let table = lookup_table(ctx, table_name)?;
    ctx.ensure_transaction().await?;

    let pk_values = pk_values_from_args(table, arguments)?;
    let (sql, args) = plan::delete(table, pk_values)?.into_parts();
    let outcome = ctx.session().execute(&sql, args).await?;
    Ok(juniper::Value::scalar(outcome.rows_affected() as i32))
}
