//! Schema reflection: introspects the live SQL catalog and produces a
//! versioned, immutable snapshot of tables, relationships, and GraphQL names.
//! The pipeline is pure given the same catalog; two runs over identical
//! inputs emit identical fingerprints.

pub mod catalog;
pub mod filter;
pub mod junction;
pub mod model;
pub mod naming;

use crate::engine::config::SchemaConfig;
use crate::engine::database::QueryFacility;
use crate::engine::reflect::model::{
    Junction, Relationship, RelationshipKind, ScalarOverride, Snapshot, Table,
};
use crate::engine::reflect::naming::NameRegistry;
use crate::error::Error;
use log::{debug, trace, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Builds one snapshot from the live catalog. When `role` is set, the caller
/// has already bound the session to that role, and the snapshot records it.
pub async fn build_snapshot(
    db: &dyn QueryFacility,
    database: &str,
    config: &SchemaConfig,
    role: Option<String>,
) -> Result<Snapshot, Error> {
    debug!("build_snapshot -- database: {}, role: {:?}", database, role);

    // 1. Query the catalog.
    let mut tables =
        catalog::load_tables(db, database, config.filter.scan_views_enabled()).await?;
    drop_malformed_foreign_keys(&mut tables);

    // 2. Apply type-mapping overrides.
    for table in tables.iter_mut() {
        let name = table.name().to_string();
        for column in table.columns_mut() {
            let qualified = format!("{}.{}", name, column.name());
            column.set_override_scalar(compute_override(config, &qualified, column.column_type()));
        }
    }

    // 3. Filter.
    let mut tables = filter::apply(&config.filter, tables);

    // 4. Classify junctions.
    let junctions: HashMap<String, Junction> = tables
        .iter()
        .filter_map(|t| junction::classify(t, &tables).map(|j| (t.name().to_string(), j)))
        .collect();
    for table in tables.iter_mut() {
        table.set_junction(junctions.get(table.name()).cloned());
    }

    // 5. Derive relationships.
    derive_relationships(&mut tables, &junctions);

    // 6. Apply naming.
    apply_naming(&mut tables, config);

    // 7. Fingerprint over the ordered catalog plus the schema config.
    let fingerprint = compute_fingerprint(&tables, config)?;

    // 8. Emit.
    Ok(Snapshot::new(tables, true, fingerprint, role))
}

/// A foreign key must pair equal, non-empty column lists or it is dropped.
fn drop_malformed_foreign_keys(tables: &mut [Table]) {
    for table in tables.iter_mut() {
        table.foreign_keys_mut().retain(|fk| {
            let well_formed =
                !fk.columns().is_empty() && fk.columns().len() == fk.referenced_columns().len();
            if !well_formed {
                warn!(
                    "dropping malformed foreign key {} on {}",
                    fk.constraint_name(),
                    fk.referenced_table()
                );
            }
            well_formed
        });
    }
}

fn compute_override(
    config: &SchemaConfig,
    qualified: &str,
    column_type: &str,
) -> Option<ScalarOverride> {
    let overrides = &config.overrides;
    if filter::matches_any(overrides.uuid_columns(), qualified) {
        return Some(ScalarOverride::Uuid);
    }
    let tinyint1 = column_type.starts_with("tinyint(1)");
    if tinyint1 && filter::matches_any(overrides.tinyint1_int_columns(), qualified) {
        return Some(ScalarOverride::Int);
    }
    if filter::matches_any(overrides.tinyint1_boolean_columns(), qualified) {
        return Some(ScalarOverride::Boolean);
    }
    None
}

/// Derives the relationship set for every table. Plain foreign keys yield a
/// many-to-one on the local table and a one-to-many on the remote table.
/// Junction FKs instead yield many-to-many edges between the two bases, plus
/// an edge-list field per base for attribute junctions; the junction table
/// keeps its own many-to-one fields.
fn derive_relationships(tables: &mut Vec<Table>, junctions: &HashMap<String, Junction>) {
    let mut derived: HashMap<String, Vec<Relationship>> = HashMap::new();
    let lookup: HashMap<String, Table> = tables
        .iter()
        .map(|t| (t.name().to_string(), t.clone()))
        .collect();

    for table in tables.iter() {
        if let Some(junction) = junctions.get(table.name()) {
            for (own, other) in [
                (junction.left(), junction.right()),
                (junction.right(), junction.left()),
            ] {
                let base = own.referenced_table().to_string();
                let target = other.referenced_table().to_string();
                let indexed = lookup
                    .get(&target)
                    .map(|t| t.unique_covering(&other.referenced_columns().to_vec()))
                    .unwrap_or(false);
                let kind = if junction.is_pure() {
                    RelationshipKind::ManyToManyPure
                } else {
                    RelationshipKind::ManyToManyAttribute
                };
                derived.entry(base.clone()).or_default().push(
                    Relationship::new(
                        kind,
                        base.clone(),
                        own.referenced_columns().to_vec(),
                        target,
                        other.referenced_columns().to_vec(),
                        Some(table.name().to_string()),
                        indexed,
                    ),
                );
                if !junction.is_pure() {
                    derived.entry(base.clone()).or_default().push(
                        Relationship::new(
                            RelationshipKind::EdgeList,
                            base,
                            own.referenced_columns().to_vec(),
                            table.name().to_string(),
                            own.columns().to_vec(),
                            Some(table.name().to_string()),
                            true,
                        ),
                    );
                }
            }
        }

        for fk in table.foreign_keys() {
            let remote = match lookup.get(fk.referenced_table()) {
                Some(r) => r,
                None => continue,
            };
            let indexed = remote.unique_covering(&fk.referenced_columns().to_vec());
            derived
                .entry(table.name().to_string())
                .or_default()
                .push(Relationship::new(
                    RelationshipKind::ManyToOne,
                    table.name().to_string(),
                    fk.columns().to_vec(),
                    remote.name().to_string(),
                    fk.referenced_columns().to_vec(),
                    None,
                    indexed,
                ));
            // Junction FKs surface on the bases as M2M edges instead.
            if !junctions.contains_key(table.name()) {
                derived
                    .entry(remote.name().to_string())
                    .or_default()
                    .push(Relationship::new(
                        RelationshipKind::OneToMany,
                        remote.name().to_string(),
                        fk.referenced_columns().to_vec(),
                        table.name().to_string(),
                        fk.columns().to_vec(),
                        None,
                        has_index_prefix(table, fk.columns()),
                    ));
            }
        }
    }

    for table in tables.iter_mut() {
        *table.relationships_mut() = derived.remove(table.name()).unwrap_or_default();
    }
}

/// Whether the child table has any index whose leading columns are exactly
/// the FK columns, so one-to-many traversal is seekable.
fn has_index_prefix(table: &Table, columns: &[String]) -> bool {
    table.indexes().iter().any(|ix| {
        ix.columns().len() >= columns.len() && ix.columns()[..columns.len()] == *columns
    })
}

/// Assigns GraphQL type, query, and field names across the snapshot. Naming
/// is idempotent: running it again over the assigned names is a no-op because
/// the registry is rebuilt from scratch on every application.
fn apply_naming(tables: &mut [Table], config: &SchemaConfig) {
    let mut registry = NameRegistry::new(
        config.naming.pluralize().clone(),
        config.naming.singularize().clone(),
    );

    for table in tables.iter_mut() {
        let type_name = registry.register_type(table.name());
        trace!("apply_naming -- {} => {}", table.name(), type_name);
        table.set_type_name(type_name);
    }
    for table in tables.iter_mut() {
        let singular = registry.singularize(table.name());
        let plural = registry.pluralize(table.name());
        let single = registry.register_query_field(&singular);
        let many = registry.register_query_field(&plural);
        table.set_single_query_name(single);
        table.set_plural_query_name(many);
    }

    for table in tables.iter_mut() {
        let type_name = table.type_name().to_string();
        for column in table.columns_mut() {
            let field = if column.primary_key() {
                registry.register_pk_column_field(&type_name, column.name())
            } else {
                registry.register_column_field(&type_name, column.name())
            };
            column.set_field_name(field);
        }

        let table_name = table.name().to_string();
        for rel in table.relationships_mut() {
            let base = match rel.kind() {
                RelationshipKind::ManyToOne => registry.singularize(rel.remote_table()),
                RelationshipKind::OneToMany => registry.pluralize(rel.remote_table()),
                RelationshipKind::ManyToManyPure | RelationshipKind::ManyToManyAttribute => {
                    let junction = rel.junction_table().cloned().unwrap_or_default();
                    let target = registry.junction_field_base(
                        &junction,
                        &table_name,
                        rel.remote_table(),
                        rel.remote_table(),
                    );
                    registry.pluralize(&target)
                }
                RelationshipKind::EdgeList => registry.pluralize(rel.remote_table()),
            };
            let field = registry.register_relationship_field(
                &type_name,
                &base,
                rel.kind() == RelationshipKind::ManyToOne,
            );
            rel.set_field_name(field);
        }
    }
}

/// SHA-256 over the canonical serialization of the filtered catalog and the
/// schema configuration. Tables arrive ordered by name and columns in
/// declaration order, so identical inputs hash identically.
fn compute_fingerprint(tables: &[Table], config: &SchemaConfig) -> Result<String, Error> {
    let mut hasher = Sha256::new();
    let catalog = serde_json::to_vec(tables).map_err(|e| Error::TypeConversionFailed {
        src: format!("catalog serialization: {}", e),
        dst: "fingerprint".to_string(),
    })?;
    hasher.update(&catalog);
    let config_bytes = serde_json::to_vec(config).map_err(|e| Error::TypeConversionFailed {
        src: format!("config serialization: {}", e),
        dst: "fingerprint".to_string(),
    })?;
    hasher.update(&config_bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::{compute_fingerprint, derive_relationships, apply_naming};
    use crate::engine::config::SchemaConfig;
    use crate::engine::reflect::junction::classify;
    use crate::engine::reflect::model::{
        Column, ForeignKey, Junction, RelationshipKind, Table,
    };
    use std::collections::HashMap;

    fn pk(table: &str, name: &str) -> Column {
        Column::new(
            table.to_string(),
            name.to_string(),
            "bigint".to_string(),
            "bigint(20)".to_string(),
            false,
            None,
            true,
        )
    }

    fn col(table: &str, name: &str) -> Column {
        Column::new(
            table.to_string(),
            name.to_string(),
            "varchar".to_string(),
            "varchar(255)".to_string(),
            true,
            None,
            false,
        )
    }

    fn blog_tables() -> Vec<Table> {
        vec![
            Table::new(
                "posts".to_string(),
                false,
                vec![pk("posts", "id"), col("posts", "title"), {
                    Column::new(
                        "posts".to_string(),
                        "author_id".to_string(),
                        "bigint".to_string(),
                        "bigint(20)".to_string(),
                        false,
                        None,
                        false,
                    )
                }],
                Vec::new(),
                vec![ForeignKey::new(
                    "fk_posts_author".to_string(),
                    vec!["author_id".to_string()],
                    "users".to_string(),
                    vec!["id".to_string()],
                )],
            ),
            Table::new(
                "users".to_string(),
                false,
                vec![pk("users", "id"), col("users", "name")],
                Vec::new(),
                Vec::new(),
            ),
        ]
    }

    /// Passes if a plain FK yields one many-to-one and one one-to-many
    #[test]
    fn fk_orientations() {
        let mut tables = blog_tables();
        derive_relationships(&mut tables, &HashMap::new());

        let posts = tables.iter().find(|t| t.name() == "posts").unwrap();
        assert_eq!(1, posts.relationships().len());
        assert_eq!(
            RelationshipKind::ManyToOne,
            posts.relationships()[0].kind()
        );
        assert_eq!("users", posts.relationships()[0].remote_table());

        let users = tables.iter().find(|t| t.name() == "users").unwrap();
        assert_eq!(1, users.relationships().len());
        assert_eq!(
            RelationshipKind::OneToMany,
            users.relationships()[0].kind()
        );
        assert_eq!("posts", users.relationships()[0].remote_table());
    }

    /// Passes if naming assigns databaseId, type names, and relationship
    /// fields over a derived schema
    #[test]
    fn naming_end_to_end() {
        let mut tables = blog_tables();
        derive_relationships(&mut tables, &HashMap::new());
        apply_naming(&mut tables, &SchemaConfig::default());

        let posts = tables.iter().find(|t| t.name() == "posts").unwrap();
        assert_eq!("Post", posts.type_name());
        assert_eq!("post", posts.single_query_name());
        assert_eq!("posts", posts.plural_query_name());
        assert_eq!(
            "databaseId",
            posts.column("id").unwrap().field_name()
        );
        assert_eq!("user", posts.relationships()[0].field_name());

        let users = tables.iter().find(|t| t.name() == "users").unwrap();
        assert_eq!("posts", users.relationships()[0].field_name());
    }

    /// Passes if junction tables produce many-to-many edges on the bases and
    /// no one-to-many from the junction FKs
    #[test]
    fn junction_relationships() {
        let mut tables = vec![
            Table::new(
                "users".to_string(),
                false,
                vec![pk("users", "id")],
                Vec::new(),
                Vec::new(),
            ),
            Table::new(
                "roles".to_string(),
                false,
                vec![pk("roles", "id")],
                Vec::new(),
                Vec::new(),
            ),
            Table::new(
                "user_roles".to_string(),
                false,
                vec![pk("user_roles", "user_id"), pk("user_roles", "role_id")],
                Vec::new(),
                vec![
                    ForeignKey::new(
                        "fk_ur_user".to_string(),
                        vec!["user_id".to_string()],
                        "users".to_string(),
                        vec!["id".to_string()],
                    ),
                    ForeignKey::new(
                        "fk_ur_role".to_string(),
                        vec!["role_id".to_string()],
                        "roles".to_string(),
                        vec!["id".to_string()],
                    ),
                ],
            ),
        ];
        let junctions: HashMap<String, Junction> = tables
            .iter()
            .filter_map(|t| classify(t, &tables).map(|j| (t.name().to_string(), j)))
            .collect();
        assert!(junctions.contains_key("user_roles"));

        derive_relationships(&mut tables, &junctions);

        let users = tables.iter().find(|t| t.name() == "users").unwrap();
        assert_eq!(1, users.relationships().len());
        assert_eq!(
            RelationshipKind::ManyToManyPure,
            users.relationships()[0].kind()
        );
        assert_eq!("roles", users.relationships()[0].remote_table());
        assert_eq!(
            Some(&"user_roles".to_string()),
            users.relationships()[0].junction_table()
        );

        let junction = tables.iter().find(|t| t.name() == "user_roles").unwrap();
        assert_eq!(2, junction.relationships().len());
        assert!(junction
            .relationships()
            .iter()
            .all(|r| r.kind() == RelationshipKind::ManyToOne));
    }

    /// Passes if identical inputs produce identical fingerprints and a
    /// catalog change perturbs the hash
    #[test]
    fn fingerprint_deterministic() {
        let config = SchemaConfig::default();
        let a = compute_fingerprint(&blog_tables(), &config).unwrap();
        let b = compute_fingerprint(&blog_tables(), &config).unwrap();

        assert_eq!(a, b);

        let mut changed = blog_tables();
        changed[0].columns_mut().push(col("posts", "subtitle"));
        let c = compute_fingerprint(&changed, &config).unwrap();

        assert_ne!(a, c);
    }
}
