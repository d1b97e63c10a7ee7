//! Dynamic GraphQL value types. A single [`Node`] struct represents every
//! object in the generated schema; the type information in [`Info`] drives
//! both metadata registration and field resolution, so the schema follows the
//! snapshot rather than compile-time types.

pub mod resolvers;

use crate::engine::context::GraphQLContext;
use crate::engine::reflect::model::Table;
use crate::engine::schema::{ident, Info, NodeType, Property, TypeKind};
use crate::engine::schema::scalars::{
    BigInt, Bytes, Date, Decimal, Json, NonNegativeInt, Time, Uuid, Vector, Year,
};
use crate::engine::value::Value;
use crate::error::Error;
use juniper::meta::MetaType;
use juniper::{
    Arguments, BoxFuture, DefaultScalarValue, ExecutionResult, Executor, FromInputValue,
    GraphQLType, GraphQLValue, GraphQLValueAsync, InputValue, Registry, Selection, ID,
};
use log::{error, trace};
use std::collections::HashMap;

/// A value of an input object type. Carries the raw [`Value`] tree; the
/// mutation resolvers coerce fields per column.
#[derive(Clone, Debug)]
pub(crate) struct Input {
    value: Value,
}

impl Input {
    pub(crate) fn value(&self) -> &Value {
        &self.value
    }
}

impl FromInputValue for Input {
    fn from_input_value(v: &InputValue) -> Option<Self> {
        Value::from_input_value(v).map(|value| Input { value })
    }
}

impl GraphQLType for Input {
    fn name(info: &Self::TypeInfo) -> Option<&str> {
        Some(info.name())
    }

    fn meta<'r>(info: &Self::TypeInfo, registry: &mut Registry<'r>) -> MetaType<'r>
    where
        DefaultScalarValue: 'r,
    {
        trace!("Input::meta called for {}", info.name());
        let nt = info.type_def().unwrap_or_else(|e| {
            // only reachable through a schema-generation bug
            error!("Input::meta missing type {}: {}", info.name(), e);
            panic!("missing input type {}", info.name())
        });

        let mut props: Vec<&Property> = nt.props().collect();
        props.sort_by_key(|p| p.name().to_string());

        let args = props
            .iter()
            .map(|p| scalar_argument(registry, p.name(), p.type_name(), p.required(), info))
            .collect::<Vec<_>>();
        registry.build_input_object_type::<Input>(info, &args).into_meta()
    }
}

impl GraphQLValue for Input {
    type Context = GraphQLContext;
    type TypeInfo = Info;

    fn type_name<'i>(&self, info: &'i Self::TypeInfo) -> Option<&'i str> {
        Some(info.name())
    }
}

/// One GraphQL object value: the concrete type name plus a map of
/// already-materialized field values keyed by GraphQL field name.
#[derive(Clone, Debug)]
pub struct Node {
    concrete_typename: String,
    fields: HashMap<String, Value>,
}

impl Node {
    pub(crate) fn new(concrete_typename: String, fields: HashMap<String, Value>) -> Node {
        Node {
            concrete_typename,
            fields,
        }
    }

    /// A field-less marker for root types (`Query`, `Mutation`).
    pub(crate) fn type_marker(type_name: &str) -> Node {
        Node::new(type_name.to_string(), HashMap::new())
    }

    /// Builds a node from a decoded SQL row, renaming columns to their
    /// GraphQL field names.
    pub(crate) fn from_row(
        table: &Table,
        mut row: HashMap<String, Value>,
    ) -> Result<Node, Error> {
        let mut fields = HashMap::with_capacity(table.columns().len());
        for column in table.columns() {
            let value = row.remove(column.name()).unwrap_or(Value::Null);
            fields.insert(column.field_name().to_string(), value);
        }
        // computed columns (vector distance) ride along under their alias
        for (key, value) in row {
            fields.insert(key, value);
        }
        Ok(Node::new(table.type_name().to_string(), fields))
    }

    pub(crate) fn typename(&self) -> &str {
        &self.concrete_typename
    }

    pub(crate) fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub(crate) fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    /// Encodes this node's opaque ID from its primary key values.
    pub(crate) fn id(&self, table: &Table) -> Result<String, Error> {
        let mut pk_values = Vec::new();
        for column in table.primary_key_columns() {
            let v = self
                .fields
                .get(column.field_name())
                .ok_or_else(|| Error::SchemaItemNotFound {
                    name: format!("{}::{}", self.concrete_typename, column.field_name()),
                })?;
            pk_values.push(v.clone());
        }
        ident::encode_node_id(&self.concrete_typename, &pk_values)
    }

    fn union_meta<'r>(nt: &NodeType, info: &Info, registry: &mut Registry<'r>) -> MetaType<'r>
    where
        DefaultScalarValue: 'r,
    {
        trace!("Node::union_meta -- {}", nt.type_name());
        let types = nt
            .union_types()
            .unwrap_or_default()
            .iter()
            .map(|member| {
                registry.get_type::<Node>(&Info::new(member.to_string(), info.type_defs()))
            })
            .collect::<Vec<_>>();
        registry.build_union_type::<Node>(info, &types).into_meta()
    }

    fn object_meta<'r>(nt: &NodeType, info: &Info, registry: &mut Registry<'r>) -> MetaType<'r>
    where
        DefaultScalarValue: 'r,
    {
        trace!("Node::object_meta -- {}", nt.type_name());
        let mut props: Vec<&Property> = nt.props().collect();
        props.sort_by_key(|p| p.name().to_string());

        let fields = props
            .iter()
            .map(|p| {
                let field = if is_scalar_name(p.type_name()) {
                    scalar_field(registry, p.name(), p.type_name(), p.required(), p.list())
                } else {
                    let child = Info::new(p.type_name().to_string(), info.type_defs());
                    match (p.required(), p.list()) {
                        (true, true) => registry.field::<Vec<Node>>(p.name(), &child),
                        (true, false) => registry.field::<Node>(p.name(), &child),
                        (false, true) => registry.field::<Option<Vec<Node>>>(p.name(), &child),
                        (false, false) => registry.field::<Option<Node>>(p.name(), &child),
                    }
                };
                p.arguments().iter().fold(field, |f, a| {
                    f.argument(scalar_argument(
                        registry,
                        a.name(),
                        a.type_name(),
                        a.kind() == crate::engine::schema::ArgumentKind::Required,
                        info,
                    ))
                })
            })
            .collect::<Vec<_>>();

        registry.build_object_type::<Node>(info, &fields).into_meta()
    }
}

fn is_scalar_name(type_name: &str) -> bool {
    matches!(
        type_name,
        "Boolean"
            | "Int"
            | "Float"
            | "String"
            | "ID"
            | "BigInt"
            | "Decimal"
            | "Date"
            | "Time"
            | "Year"
            | "Bytes"
            | "UUID"
            | "Vector"
            | "JSON"
            | "NonNegativeInt"
    )
}

macro_rules! typed_field {
    ($registry:expr, $name:expr, $required:expr, $list:expr, $t:ty) => {
        match ($required, $list) {
            (true, true) => $registry.field::<Vec<$t>>($name, &()),
            (true, false) => $registry.field::<$t>($name, &()),
            (false, true) => $registry.field::<Option<Vec<$t>>>($name, &()),
            (false, false) => $registry.field::<Option<$t>>($name, &()),
        }
    };
}

fn scalar_field<'r>(
    registry: &mut Registry<'r>,
    name: &str,
    type_name: &str,
    required: bool,
    list: bool,
) -> juniper::meta::Field<'r, DefaultScalarValue> {
    match type_name {
        "Boolean" => typed_field!(registry, name, required, list, bool),
        "Int" => typed_field!(registry, name, required, list, i32),
        "Float" => typed_field!(registry, name, required, list, f64),
        "ID" => typed_field!(registry, name, required, list, ID),
        "BigInt" => typed_field!(registry, name, required, list, BigInt),
        "Decimal" => typed_field!(registry, name, required, list, Decimal),
        "Date" => typed_field!(registry, name, required, list, Date),
        "Time" => typed_field!(registry, name, required, list, Time),
        "Year" => typed_field!(registry, name, required, list, Year),
        "Bytes" => typed_field!(registry, name, required, list, Bytes),
        "UUID" => typed_field!(registry, name, required, list, Uuid),
        "Vector" => typed_field!(registry, name, required, list, Vector),
        "JSON" => typed_field!(registry, name, required, list, Json),
        "NonNegativeInt" => typed_field!(registry, name, required, list, NonNegativeInt),
        _ => typed_field!(registry, name, required, list, String),
    }
}

macro_rules! typed_arg {
    ($registry:expr, $name:expr, $required:expr, $info:expr, $t:ty) => {
        if $required {
            $registry.arg::<$t>($name, $info)
        } else {
            $registry.arg::<Option<$t>>($name, $info)
        }
    };
}

fn scalar_argument<'r>(
    registry: &mut Registry<'r>,
    name: &str,
    type_name: &str,
    required: bool,
    info: &Info,
) -> juniper::meta::Argument<'r, DefaultScalarValue> {
    match type_name {
        "Boolean" => typed_arg!(registry, name, required, &(), bool),
        "Int" => typed_arg!(registry, name, required, &(), i32),
        "Float" => typed_arg!(registry, name, required, &(), f64),
        "String" => typed_arg!(registry, name, required, &(), String),
        "ID" => typed_arg!(registry, name, required, &(), ID),
        "BigInt" => typed_arg!(registry, name, required, &(), BigInt),
        "Decimal" => typed_arg!(registry, name, required, &(), Decimal),
        "Date" => typed_arg!(registry, name, required, &(), Date),
        "Time" => typed_arg!(registry, name, required, &(), Time),
        "Year" => typed_arg!(registry, name, required, &(), Year),
        "Bytes" => typed_arg!(registry, name, required, &(), Bytes),
        "UUID" => typed_arg!(registry, name, required, &(), Uuid),
        "Vector" => typed_arg!(registry, name, required, &(), Vector),
        "JSON" => typed_arg!(registry, name, required, &(), Json),
        "NonNegativeInt" => typed_arg!(registry, name, required, &(), NonNegativeInt),
        input_type => {
            let child = Info::new(input_type.to_string(), info.type_defs());
            if required {
                registry.arg::<Input>(name, &child)
            } else {
                registry.arg::<Option<Input>>(name, &child)
            }
        }
    }
}

impl GraphQLType for Node {
    fn name(info: &Self::TypeInfo) -> Option<&str> {
        Some(info.name())
    }

    fn meta<'r>(info: &Self::TypeInfo, registry: &mut Registry<'r>) -> MetaType<'r>
    where
        DefaultScalarValue: 'r,
    {
        let nt = info.type_def().unwrap_or_else(|e| {
            error!("Node::meta missing type {}: {}", info.name(), e);
            panic!("missing type {}", info.name())
        });
        match nt.type_kind() {
            TypeKind::Union => Node::union_meta(nt, info, registry),
            TypeKind::Object => Node::object_meta(nt, info, registry),
            TypeKind::Input => {
                error!("Node::meta called for input type {}", info.name());
                panic!("input type {} registered as node", info.name())
            }
        }
    }
}

impl GraphQLValue for Node {
    type Context = GraphQLContext;
    type TypeInfo = Info;

    fn type_name<'i>(&self, info: &'i Self::TypeInfo) -> Option<&'i str> {
        Some(info.name())
    }

    fn concrete_type_name(&self, _context: &Self::Context, _info: &Self::TypeInfo) -> String {
        self.concrete_typename.clone()
    }

    fn resolve_field(
        &self,
        _info: &Self::TypeInfo,
        field_name: &str,
        _args: &Arguments,
        _executor: &Executor<Self::Context>,
    ) -> ExecutionResult {
        // execution is async end to end; the sync path is never taken
        Err(juniper::FieldError::new(
            format!("synchronous resolution of {} is not supported", field_name),
            juniper::Value::null(),
        ))
    }
}

impl GraphQLValueAsync for Node {
    fn resolve_field_async<'a>(
        &'a self,
        info: &'a Self::TypeInfo,
        field_name: &'a str,
        arguments: &'a Arguments,
        executor: &'a Executor<Self::Context>,
    ) -> BoxFuture<'a, ExecutionResult> {
        Box::pin(resolvers::resolve_field(
            self, info, field_name, arguments, executor,
        ))
    }

    fn resolve_into_type_async<'a>(
        &'a self,
        info: &'a Self::TypeInfo,
        type_name: &str,
        selection_set: Option<&'a [Selection<'a, DefaultScalarValue>]>,
        executor: &'a Executor<'a, 'a, Self::Context, DefaultScalarValue>,
    ) -> BoxFuture<'a, ExecutionResult> {
        trace!(
            "Node::resolve_into_type_async -- {} as {}",
            self.concrete_typename,
            type_name
        );
        let concrete = Info::new(type_name.to_string(), info.type_defs());
        Box::pin(async move {
            GraphQLValueAsync::resolve_async(self, &concrete, selection_set, executor).await
        })
    }
}
