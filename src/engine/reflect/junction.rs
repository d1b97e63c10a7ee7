//! Detects tables whose sole or primary role is to link two other tables,
//! distinguishing pure junctions from junctions that carry attributes.

use crate::engine::reflect::model::{Junction, JunctionKind, Table};
use log::trace;
use std::collections::HashSet;

/// Classifies a single table against the full (filtered) table set. Returns
/// `None` for anything that is not a junction.
///
/// A table is a junction when it is not a view, has exactly two foreign keys
/// to two different existing tables, the union of the FK local columns is
/// covered by a unique constraint, and every junction FK column is
/// non-nullable.
pub(crate) fn classify(table: &Table, all: &[Table]) -> Option<Junction> {
    if table.is_view() {
        return None;
    }
    if table.foreign_keys().len() != 2 {
        return None;
    }

    let fk_a = &table.foreign_keys()[0];
    let fk_b = &table.foreign_keys()[1];
    if fk_a.referenced_table() == fk_b.referenced_table() {
        return None;
    }
    for fk in [fk_a, fk_b] {
        if !all.iter().any(|t| t.name() == fk.referenced_table()) {
            return None;
        }
    }

    let mut fk_columns: HashSet<&str> = HashSet::new();
    for fk in [fk_a, fk_b] {
        for c in fk.columns() {
            fk_columns.insert(c.as_str());
        }
    }
    for name in &fk_columns {
        match table.column(name) {
            Some(c) if !c.nullable() => {}
            _ => return None,
        }
    }
    let union: Vec<String> = fk_columns.iter().map(|c| c.to_string()).collect();
    if !table.unique_covering(&union) {
        return None;
    }

    let attribute_columns: Vec<String> = table
        .columns()
        .iter()
        .filter(|c| !fk_columns.contains(c.name()))
        .map(|c| c.name().to_string())
        .collect();

    // Alphabetical ordering by referenced table is the canonical identity of
    // the edge type.
    let (left, right) = if fk_a.referenced_table() <= fk_b.referenced_table() {
        (fk_a.clone(), fk_b.clone())
    } else {
        (fk_b.clone(), fk_a.clone())
    };

    let kind = if attribute_columns.is_empty() {
        JunctionKind::Pure
    } else {
        JunctionKind::Attribute { attribute_columns }
    };
    trace!("classify -- {} is a {:?} junction", table.name(), kind);

    Some(Junction::new(kind, left, right))
}

#[cfg(test)]
mod tests {
    use super::classify;
    use crate::engine::reflect::model::{Column, ForeignKey, JunctionKind, Table};

    fn pk_column(table: &str, name: &str) -> Column {
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

    fn plain_column(table: &str, name: &str, nullable: bool) -> Column {
        Column::new(
            table.to_string(),
            name.to_string(),
            "varchar".to_string(),
            "varchar(64)".to_string(),
            nullable,
            None,
            false,
        )
    }

    fn base_table(name: &str) -> Table {
        Table::new(
            name.to_string(),
            false,
            vec![pk_column(name, "id")],
            Vec::new(),
            Vec::new(),
        )
    }

    fn junction_fks() -> Vec<ForeignKey> {
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
        ]
    }

    /// Passes if the canonical users/roles fixture classifies as a pure
    /// junction with FKs ordered alphabetically by referenced table
    #[test]
    fn pure_junction() {
        let all = vec![base_table("users"), base_table("roles")];
        let j = Table::new(
            "user_roles".to_string(),
            false,
            vec![
                pk_column("user_roles", "user_id"),
                pk_column("user_roles", "role_id"),
            ],
            Vec::new(),
            junction_fks(),
        );

        let junction = classify(&j, &all).unwrap();

        assert!(junction.is_pure());
        assert_eq!("roles", junction.left().referenced_table());
        assert_eq!("users", junction.right().referenced_table());
    }

    /// Passes if extra non-FK columns produce an attribute junction carrying
    /// exactly those columns
    #[test]
    fn attribute_junction() {
        let all = vec![base_table("users"), base_table("roles")];
        let j = Table::new(
            "user_roles".to_string(),
            false,
            vec![
                pk_column("user_roles", "user_id"),
                pk_column("user_roles", "role_id"),
                plain_column("user_roles", "granted_at", false),
            ],
            Vec::new(),
            junction_fks(),
        );

        let junction = classify(&j, &all).unwrap();

        match junction.kind() {
            JunctionKind::Attribute { attribute_columns } => {
                assert_eq!(&vec!["granted_at".to_string()], attribute_columns);
            }
            other => panic!("expected attribute junction, got {:?}", other),
        }
    }

    /// Passes if a nullable FK column disqualifies the table
    #[test]
    fn nullable_fk_disqualifies() {
        let all = vec![base_table("users"), base_table("roles")];
        let j = Table::new(
            "user_roles".to_string(),
            false,
            vec![
                pk_column("user_roles", "user_id"),
                plain_column("user_roles", "role_id", true),
            ],
            Vec::new(),
            junction_fks(),
        );

        assert!(classify(&j, &all).is_none());
    }

    /// Passes if a missing unique covering constraint disqualifies the table
    #[test]
    fn no_unique_covering_disqualifies() {
        let all = vec![base_table("users"), base_table("roles")];
        let j = Table::new(
            "user_roles".to_string(),
            false,
            vec![
                plain_column("user_roles", "user_id", false),
                plain_column("user_roles", "role_id", false),
            ],
            Vec::new(),
            junction_fks(),
        );

        assert!(classify(&j, &all).is_none());
    }

    /// Passes if both FKs pointing at the same table disqualify the table
    #[test]
    fn self_pair_disqualifies() {
        let all = vec![base_table("users")];
        let j = Table::new(
            "follows".to_string(),
            false,
            vec![
                pk_column("follows", "follower_id"),
                pk_column("follows", "followee_id"),
            ],
            Vec::new(),
            vec![
                ForeignKey::new(
                    "fk_f_follower".to_string(),
                    vec!["follower_id".to_string()],
                    "users".to_string(),
                    vec!["id".to_string()],
                ),
                ForeignKey::new(
                    "fk_f_followee".to_string(),
                    vec!["followee_id".to_string()],
                    "users".to_string(),
                    vec!["id".to_string()],
                ),
            ],
        );

        assert!(classify(&j, &all).is_none());
    }
}
