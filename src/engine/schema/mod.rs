//! Translates a reflected snapshot into the type information that drives the
//! dynamic GraphQL schema: object types, Relay connections, input objects,
//! the query and mutation roots, and the `Node` union. The generated
//! [`Info`]/[`NodeType`] structures are what juniper's registry and the
//! auto-generated resolvers consume.

pub mod ident;
pub mod scalars;

use crate::engine::config::SchemaFilterConfig;
use crate::engine::context::GraphQLContext;
use crate::engine::objects::Node;
use crate::engine::reflect::filter;
use crate::engine::reflect::model::{FieldType, RelationshipKind, Snapshot, Table};
use crate::error::Error;
use juniper::{EmptySubscription, RootNode};
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the query root type.
pub(crate) const QUERY_TYPE: &str = "Query";

/// Name of the mutation root type.
pub(crate) const MUTATION_TYPE: &str = "Mutation";

/// Name of the union of every table type, resolved by `node(id:)`.
pub(crate) const NODE_UNION_TYPE: &str = "Node";

pub(crate) const PAGE_INFO_TYPE: &str = "PageInfo";

/// Carries the type information for the GraphQL schema, derived from one
/// snapshot. Used by the auto-generated resolvers for every lookup.
#[derive(Clone, Debug)]
pub struct Info {
    name: String,
    type_defs: Arc<HashMap<String, NodeType>>,
}

impl Info {
    pub(crate) fn new(name: String, type_defs: Arc<HashMap<String, NodeType>>) -> Info {
        Info { name, type_defs }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn type_def(&self) -> Result<&NodeType, Error> {
        self.type_def_by_name(&self.name)
    }

    pub(crate) fn type_def_by_name(&self, name: &str) -> Result<&NodeType, Error> {
        self.type_defs
            .get(name)
            .ok_or_else(|| Error::SchemaItemNotFound {
                name: name.to_string(),
            })
    }

    pub(crate) fn type_defs(&self) -> Arc<HashMap<String, NodeType>> {
        self.type_defs.clone()
    }
}

pub(crate) type RootRef = Arc<RootNode<'static, Node, Node, EmptySubscription<GraphQLContext>>>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ArgumentKind {
    Required,
    Optional,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum TypeKind {
    Input,
    Object,
    Union,
}

/// What a property resolves to, and the data its resolver needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum PropertyKind {
    /// Column value already present on the node
    Scalar,
    /// Nested structure already materialized on the node (edges, pageInfo)
    Object,
    /// The opaque node ID synthesized from the primary key
    NodeId,
    /// `node(id: ID!)` lookup returning the Node union
    NodeLookup,
    /// The serving snapshot's fingerprint
    SchemaVersion,
    /// Single-row lookup by PK or unique column
    SingleQuery { table: String },
    /// Relay connection over a table
    ConnectionQuery { table: String },
    /// Traversal of a derived relationship
    Relationship { table: String, index: usize },
    InsertMutation { table: String },
    UpdateMutation { table: String },
    DeleteMutation { table: String },
}

#[derive(Clone, Debug)]
pub(crate) struct Argument {
    name: String,
    kind: ArgumentKind,
    type_name: String,
}

impl Argument {
    fn new(name: &str, kind: ArgumentKind, type_name: &str) -> Argument {
        Argument {
            name: name.to_string(),
            kind,
            type_name: type_name.to_string(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn kind(&self) -> ArgumentKind {
        self.kind
    }

    pub(crate) fn type_name(&self) -> &str {
        &self.type_name
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Property {
    name: String,
    kind: PropertyKind,
    type_name: String,
    required: bool,
    list: bool,
    arguments: Vec<Argument>,
}

impl Property {
    fn new(name: &str, kind: PropertyKind, type_name: &str) -> Property {
        Property {
            name: name.to_string(),
            kind,
            type_name: type_name.to_string(),
            required: false,
            list: false,
            arguments: Vec::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub(crate) fn type_name(&self) -> &str {
        &self.type_name
    }

    pub(crate) fn required(&self) -> bool {
        self.required
    }

    pub(crate) fn list(&self) -> bool {
        self.list
    }

    pub(crate) fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    fn with_list(mut self, list: bool) -> Self {
        self.list = list;
        self
    }

    fn with_arguments(mut self, arguments: Vec<Argument>) -> Self {
        self.arguments = arguments;
        self
    }
}

#[derive(Clone, Debug)]
pub(crate) struct NodeType {
    type_name: String,
    type_kind: TypeKind,
    props: HashMap<String, Property>,
    union_types: Option<Vec<String>>,
    table: Option<String>,
}

impl NodeType {
    fn new(type_name: &str, type_kind: TypeKind, props: Vec<Property>) -> NodeType {
        NodeType {
            type_name: type_name.to_string(),
            type_kind,
            props: props
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            union_types: None,
            table: None,
        }
    }

    fn with_union_types(mut self, types: Vec<String>) -> NodeType {
        self.union_types = Some(types);
        self
    }

    fn with_table(mut self, table: &str) -> NodeType {
        self.table = Some(table.to_string());
        self
    }

    pub(crate) fn type_name(&self) -> &str {
        &self.type_name
    }

    pub(crate) fn type_kind(&self) -> TypeKind {
        self.type_kind
    }

    pub(crate) fn property(&self, name: &str) -> Result<&Property, Error> {
        self.props.get(name).ok_or_else(|| Error::SchemaItemNotFound {
            name: format!("{}::{}", self.type_name, name),
        })
    }

    pub(crate) fn props(&self) -> impl Iterator<Item = &Property> {
        self.props.values()
    }

    pub(crate) fn union_types(&self) -> Option<&[String]> {
        self.union_types.as_deref()
    }

    pub(crate) fn table(&self) -> Option<&String> {
        self.table.as_ref()
    }
}

fn scalar_type_name(t: FieldType) -> &'static str {
    t.scalar_name()
}

fn connection_type_name(type_name: &str) -> String {
    format!("{}Connection", type_name)
}

fn edge_type_name(type_name: &str) -> String {
    format!("{}Edge", type_name)
}

fn insert_input_name(type_name: &str) -> String {
    format!("{}InsertInput", type_name)
}

fn update_input_name(type_name: &str) -> String {
    format!("{}UpdateInput", type_name)
}

fn connection_arguments(table: &Table) -> Vec<Argument> {
    let mut args = vec![
        Argument::new("first", ArgumentKind::Optional, "NonNegativeInt"),
        Argument::new("after", ArgumentKind::Optional, "String"),
        Argument::new("orderBy", ArgumentKind::Optional, "String"),
    ];
    if table
        .columns()
        .iter()
        .any(|c| c.effective_type() == FieldType::Vector)
    {
        args.push(Argument::new("nearest", ArgumentKind::Optional, "Vector"));
        args.push(Argument::new(
            "nearestColumn",
            ArgumentKind::Optional,
            "String",
        ));
    }
    args
}

/// Arguments accepted by a singular lookup: the PK field plus every
/// single-column unique index, exactly one of which must be supplied.
fn single_lookup_arguments(table: &Table) -> Vec<Argument> {
    let mut args = Vec::new();
    for column in table.primary_key_columns() {
        args.push(Argument::new(
            column.field_name(),
            ArgumentKind::Optional,
            scalar_type_name(column.effective_type()),
        ));
    }
    for index in table.single_column_unique_indexes() {
        if let Some(column) = table.column(&index.columns()[0]) {
            if !column.primary_key() {
                args.push(Argument::new(
                    column.field_name(),
                    ArgumentKind::Optional,
                    scalar_type_name(column.effective_type()),
                ));
            }
        }
    }
    args
}

/// Builds the object type for one table: the opaque `id`, every column as a
/// scalar field, and every derived relationship. Single-row relationships
/// are typed as the remote object; list relationships as its connection.
fn generate_table_object(table: &Table, snapshot: &Snapshot) -> NodeType {
    let mut props = vec![Property::new("id", PropertyKind::NodeId, "ID").with_required(true)];

    for column in table.columns() {
        props.push(
            Property::new(
                column.field_name(),
                PropertyKind::Scalar,
                scalar_type_name(column.effective_type()),
            )
            .with_required(!column.nullable()),
        );
    }

    for (index, rel) in table.relationships().iter().enumerate() {
        let remote = match snapshot.table(rel.remote_table()) {
            Some(r) => r,
            None => continue,
        };
        let kind = PropertyKind::Relationship {
            table: table.name().to_string(),
            index,
        };
        let prop = match rel.kind() {
            RelationshipKind::ManyToOne => {
                let required = rel.local_columns().iter().all(|c| {
                    table
                        .column(c)
                        .map(|col| !col.nullable())
                        .unwrap_or(false)
                });
                Property::new(rel.field_name(), kind, remote.type_name())
                    .with_required(required)
            }
            RelationshipKind::OneToMany
            | RelationshipKind::ManyToManyPure
            | RelationshipKind::ManyToManyAttribute => Property::new(
                rel.field_name(),
                kind,
                &connection_type_name(remote.type_name()),
            )
            .with_required(true)
            .with_arguments(connection_arguments(remote)),
            RelationshipKind::EdgeList => {
                Property::new(rel.field_name(), kind, remote.type_name())
                    .with_required(true)
                    .with_list(true)
            }
        };
        props.push(prop);
    }

    NodeType::new(table.type_name(), TypeKind::Object, props).with_table(table.name())
}

fn generate_connection(table: &Table) -> NodeType {
    let props = vec![
        Property::new("edges", PropertyKind::Object, &edge_type_name(table.type_name()))
            .with_required(true)
            .with_list(true),
        Property::new("pageInfo", PropertyKind::Object, PAGE_INFO_TYPE).with_required(true),
        Property::new("totalCount", PropertyKind::Scalar, "Int").with_required(true),
    ];
    NodeType::new(
        &connection_type_name(table.type_name()),
        TypeKind::Object,
        props,
    )
    .with_table(table.name())
}

fn generate_edge(table: &Table) -> NodeType {
    let props = vec![
        Property::new("node", PropertyKind::Object, table.type_name()).with_required(true),
        Property::new("cursor", PropertyKind::Scalar, "String").with_required(true),
    ];
    NodeType::new(&edge_type_name(table.type_name()), TypeKind::Object, props)
        .with_table(table.name())
}

fn generate_page_info() -> NodeType {
    let props = vec![
        Property::new("hasNextPage", PropertyKind::Scalar, "Boolean").with_required(true),
        Property::new("hasPreviousPage", PropertyKind::Scalar, "Boolean").with_required(true),
        Property::new("startCursor", PropertyKind::Scalar, "String"),
        Property::new("endCursor", PropertyKind::Scalar, "String"),
    ];
    NodeType::new(PAGE_INFO_TYPE, TypeKind::Object, props)
}

/// Whether a column accepts caller-supplied values in mutation inputs.
fn insertable(table: &Table, filter_cfg: &SchemaFilterConfig, column_name: &str) -> bool {
    !filter::mutation_denied_column(filter_cfg, table.name(), column_name)
}

fn generate_insert_input(table: &Table, filter_cfg: &SchemaFilterConfig) -> NodeType {
    let props = table
        .columns()
        .iter()
        .filter(|c| insertable(table, filter_cfg, c.name()))
        .map(|c| {
            let required =
                !c.nullable() && c.default().is_none() && !c.auto_increment();
            Property::new(
                c.field_name(),
                PropertyKind::Scalar,
                scalar_type_name(c.effective_type()),
            )
            .with_required(required)
        })
        .collect();
    NodeType::new(&insert_input_name(table.type_name()), TypeKind::Input, props)
        .with_table(table.name())
}

fn generate_update_input(table: &Table, filter_cfg: &SchemaFilterConfig) -> NodeType {
    let props = table
        .columns()
        .iter()
        .filter(|c| !c.primary_key() && insertable(table, filter_cfg, c.name()))
        .map(|c| {
            Property::new(
                c.field_name(),
                PropertyKind::Scalar,
                scalar_type_name(c.effective_type()),
            )
        })
        .collect();
    NodeType::new(&update_input_name(table.type_name()), TypeKind::Input, props)
        .with_table(table.name())
}

fn pk_arguments(table: &Table) -> Vec<Argument> {
    table
        .primary_key_columns()
        .iter()
        .map(|c| {
            Argument::new(
                c.field_name(),
                ArgumentKind::Required,
                scalar_type_name(c.effective_type()),
            )
        })
        .collect()
}

fn generate_query_root(snapshot: &Snapshot) -> NodeType {
    let mut props = vec![
        Property::new("node", PropertyKind::NodeLookup, NODE_UNION_TYPE).with_arguments(vec![
            Argument::new("id", ArgumentKind::Required, "ID"),
        ]),
        Property::new("schemaVersion", PropertyKind::SchemaVersion, "String")
            .with_required(true),
    ];
    for table in snapshot.tables() {
        if !table.primary_key_names().is_empty() {
            props.push(
                Property::new(
                    table.single_query_name(),
                    PropertyKind::SingleQuery {
                        table: table.name().to_string(),
                    },
                    table.type_name(),
                )
                .with_arguments(single_lookup_arguments(table)),
            );
        }
        props.push(
            Property::new(
                table.plural_query_name(),
                PropertyKind::ConnectionQuery {
                    table: table.name().to_string(),
                },
                &connection_type_name(table.type_name()),
            )
            .with_required(true)
            .with_arguments(connection_arguments(table)),
        );
    }
    NodeType::new(QUERY_TYPE, TypeKind::Object, props)
}

fn generate_mutation_root(snapshot: &Snapshot, filter_cfg: &SchemaFilterConfig) -> NodeType {
    let mut props = Vec::new();
    for table in snapshot.tables() {
        if table.is_view()
            || table.primary_key_names().is_empty()
            || filter::mutation_denied(filter_cfg, table.name())
        {
            continue;
        }
        let type_name = table.type_name();
        props.push(
            Property::new(
                &format!("insert{}", type_name),
                PropertyKind::InsertMutation {
                    table: table.name().to_string(),
                },
                type_name,
            )
            .with_required(true)
            .with_arguments(vec![Argument::new(
                "input",
                ArgumentKind::Required,
                &insert_input_name(type_name),
            )]),
        );
        let mut update_args = pk_arguments(table);
        update_args.push(Argument::new(
            "input",
            ArgumentKind::Required,
            &update_input_name(type_name),
        ));
        props.push(
            Property::new(
                &format!("update{}", type_name),
                PropertyKind::UpdateMutation {
                    table: table.name().to_string(),
                },
                type_name,
            )
            .with_arguments(update_args),
        );
        props.push(
            Property::new(
                &format!("delete{}", type_name),
                PropertyKind::DeleteMutation {
                    table: table.name().to_string(),
                },
                "Int",
            )
            .with_required(true)
            .with_arguments(pk_arguments(table)),
        );
    }
    NodeType::new(MUTATION_TYPE, TypeKind::Object, props)
}

/// Builds the full type-definition map for a snapshot.
pub(crate) fn generate_type_defs(
    snapshot: &Snapshot,
    filter_cfg: &SchemaFilterConfig,
) -> HashMap<String, NodeType> {
    trace!(
        "generate_type_defs -- {} tables, fingerprint {}",
        snapshot.tables().len(),
        snapshot.fingerprint()
    );
    let mut defs = HashMap::new();
    defs.insert(PAGE_INFO_TYPE.to_string(), generate_page_info());

    for table in snapshot.tables() {
        let object = generate_table_object(table, snapshot);
        defs.insert(object.type_name.clone(), object);
        let connection = generate_connection(table);
        defs.insert(connection.type_name.clone(), connection);
        let edge = generate_edge(table);
        defs.insert(edge.type_name.clone(), edge);
        let insert = generate_insert_input(table, filter_cfg);
        defs.insert(insert.type_name.clone(), insert);
        let update = generate_update_input(table, filter_cfg);
        defs.insert(update.type_name.clone(), update);
    }

    let union_members: Vec<String> = snapshot
        .tables()
        .iter()
        .filter(|t| !t.primary_key_names().is_empty())
        .map(|t| t.type_name().to_string())
        .collect();
    defs.insert(
        NODE_UNION_TYPE.to_string(),
        NodeType::new(NODE_UNION_TYPE, TypeKind::Union, Vec::new())
            .with_union_types(union_members),
    );

    let query = generate_query_root(snapshot);
    defs.insert(QUERY_TYPE.to_string(), query);
    let mutation = generate_mutation_root(snapshot, filter_cfg);
    defs.insert(MUTATION_TYPE.to_string(), mutation);

    defs
}

/// Creates the juniper root node bound to one snapshot.
pub(crate) fn create_root_node(
    snapshot: &Snapshot,
    filter_cfg: &SchemaFilterConfig,
) -> (RootRef, Arc<HashMap<String, NodeType>>) {
    let type_defs = Arc::new(generate_type_defs(snapshot, filter_cfg));
    let root = RootNode::new_with_info(
        Node::type_marker(QUERY_TYPE),
        Node::type_marker(MUTATION_TYPE),
        EmptySubscription::new(),
        Info::new(QUERY_TYPE.to_string(), type_defs.clone()),
        Info::new(MUTATION_TYPE.to_string(), type_defs.clone()),
        (),
    );
    (Arc::new(root), type_defs)
}
