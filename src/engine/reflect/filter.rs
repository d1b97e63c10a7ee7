//! Applies allow/deny glob filters to reflected tables, columns, indexes, and
//! foreign keys. Deny always wins over allow, and patterns match with
//! case-insensitive shell-glob semantics.

use crate::engine::config::SchemaFilterConfig;
use crate::engine::reflect::model::Table;
use glob::{MatchOptions, Pattern};
use log::warn;

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    }
}

/// True when `name` matches any pattern in the list. Invalid patterns are
/// rejected during config validation; one slipping through matches nothing.
pub(crate) fn matches_any(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|p| match Pattern::new(p) {
        Ok(pattern) => pattern.matches_with(name, match_options()),
        Err(_) => {
            warn!("ignoring invalid glob pattern: {}", p);
            false
        }
    })
}

/// Collects the patterns of every map entry whose table key matches `table`.
fn patterns_for_table<'a>(
    map: &'a std::collections::BTreeMap<String, Vec<String>>,
    table: &str,
) -> Vec<&'a String> {
    map.iter()
        .filter(|(key, _)| match Pattern::new(key) {
            Ok(pattern) => pattern.matches_with(table, match_options()),
            Err(_) => false,
        })
        .flat_map(|(_, pats)| pats.iter())
        .collect()
}

fn matches_any_ref(patterns: &[&String], name: &str) -> bool {
    patterns.iter().any(|p| match Pattern::new(p) {
        Ok(pattern) => pattern.matches_with(name, match_options()),
        Err(_) => false,
    })
}

/// Whether a table survives the table-level filter.
fn table_visible(cfg: &SchemaFilterConfig, table: &Table) -> bool {
    if table.is_view() && !cfg.scan_views_enabled() {
        return false;
    }
    if matches_any(cfg.deny_tables(), table.name()) {
        return false;
    }
    cfg.allow_tables().is_empty() || matches_any(cfg.allow_tables(), table.name())
}

/// Whether a column survives the column-level filter for its table.
fn column_visible(cfg: &SchemaFilterConfig, table: &str, column: &str) -> bool {
    let denied = patterns_for_table(cfg.deny_columns(), table);
    if matches_any_ref(&denied, column) {
        return false;
    }
    let allowed = patterns_for_table(cfg.allow_columns(), table);
    allowed.is_empty() || matches_any_ref(&allowed, column)
}

/// Applies the filter config to a reflected table set. Surviving tables have
/// their indexes and foreign keys reduced to the surviving columns; foreign
/// keys pointing at filtered-out tables or columns are dropped. Relationships
/// are rebuilt by the caller on the reduced schema.
pub(crate) fn apply(cfg: &SchemaFilterConfig, tables: Vec<Table>) -> Vec<Table> {
    let mut kept: Vec<Table> = tables
        .into_iter()
        .filter(|t| table_visible(cfg, t))
        .collect();

    for table in kept.iter_mut() {
        let name = table.name().to_string();
        table
            .columns_mut()
            .retain(|c| column_visible(cfg, &name, c.name()));
        let surviving: Vec<String> = table.columns().iter().map(|c| c.name().to_string()).collect();
        table
            .indexes_mut()
            .retain(|ix| ix.columns().iter().all(|c| surviving.contains(c)));
        table
            .foreign_keys_mut()
            .retain(|fk| fk.columns().iter().all(|c| surviving.contains(c)));
    }

    // Second pass: a foreign key is only as good as its remote end.
    let survivors: Vec<(String, Vec<String>)> = kept
        .iter()
        .map(|t| {
            (
                t.name().to_string(),
                t.columns().iter().map(|c| c.name().to_string()).collect(),
            )
        })
        .collect();
    for table in kept.iter_mut() {
        table.foreign_keys_mut().retain(|fk| {
            survivors
                .iter()
                .find(|(name, _)| name == fk.referenced_table())
                .map(|(_, cols)| fk.referenced_columns().iter().all(|c| cols.contains(c)))
                .unwrap_or(false)
        });
    }

    kept
}

/// Whether mutations are generated for a table. Mutation denial never affects
/// query visibility.
pub(crate) fn mutation_denied(cfg: &SchemaFilterConfig, table: &str) -> bool {
    matches_any(cfg.deny_mutation_tables(), table)
}

/// Whether a column is excluded from mutation inputs.
pub(crate) fn mutation_denied_column(cfg: &SchemaFilterConfig, table: &str, column: &str) -> bool {
    let denied = patterns_for_table(cfg.deny_mutation_columns(), table);
    matches_any_ref(&denied, column)
}

#[cfg(test)]
mod tests {
    use super::{apply, matches_any, mutation_denied};
    use crate::engine::config::SchemaFilterConfig;
    use crate::engine::reflect::model::{Column, ForeignKey, Index, Table};
    use maplit::btreemap;

    fn column(table: &str, name: &str) -> Column {
        Column::new(
            table.to_string(),
            name.to_string(),
            "bigint".to_string(),
            "bigint(20)".to_string(),
            false,
            None,
            name == "id",
        )
    }

    fn fixture() -> Vec<Table> {
        vec![
            Table::new(
                "users".to_string(),
                false,
                vec![column("users", "id"), column("users", "secret_token")],
                vec![Index::new(
                    Some("uq_secret".to_string()),
                    vec!["secret_token".to_string()],
                    true,
                )],
                Vec::new(),
            ),
            Table::new(
                "audit_log".to_string(),
                false,
                vec![column("audit_log", "id"), column("audit_log", "user_id")],
                Vec::new(),
                vec![ForeignKey::new(
                    "fk_audit_user".to_string(),
                    vec!["user_id".to_string()],
                    "users".to_string(),
                    vec!["id".to_string()],
                )],
            ),
            Table::new(
                "v_totals".to_string(),
                true,
                vec![column("v_totals", "id")],
                Vec::new(),
                Vec::new(),
            ),
        ]
    }

    /// Passes if glob matching is case-insensitive
    #[test]
    fn case_insensitive_globs() {
        assert!(matches_any(&["AUDIT_*".to_string()], "audit_log"));
        assert!(matches_any(&["audit_*".to_string()], "AUDIT_LOG"));
        assert!(!matches_any(&["audit_*".to_string()], "users"));
    }

    /// Passes if views are dropped unless view scanning is enabled
    #[test]
    fn views_dropped_by_default() {
        let cfg = SchemaFilterConfig::default();
        let kept = apply(&cfg, fixture());

        assert!(kept.iter().all(|t| t.name() != "v_totals"));

        let mut cfg = SchemaFilterConfig::default();
        cfg.set_scan_views_enabled(true);
        let kept = apply(&cfg, fixture());

        assert!(kept.iter().any(|t| t.name() == "v_totals"));
    }

    /// Passes if deny wins over allow at the table level
    #[test]
    fn deny_wins() {
        let mut cfg = SchemaFilterConfig::default();
        cfg.set_allow_tables(vec!["*".to_string()]);
        cfg.set_deny_tables(vec!["audit_*".to_string()]);
        let kept = apply(&cfg, fixture());

        assert!(kept.iter().any(|t| t.name() == "users"));
        assert!(kept.iter().all(|t| t.name() != "audit_log"));
    }

    /// Passes if filtering a column removes the indexes and foreign keys that
    /// referenced it, and filtering a table removes inbound foreign keys
    #[test]
    fn dependent_objects_dropped() {
        let mut cfg = SchemaFilterConfig::default();
        cfg.set_deny_columns(btreemap! {
            "users".to_string() => vec!["secret_*".to_string()],
        });
        let kept = apply(&cfg, fixture());
        let users = kept.iter().find(|t| t.name() == "users").unwrap();

        assert!(users.column("secret_token").is_none());
        assert!(users.indexes().is_empty());

        let mut cfg = SchemaFilterConfig::default();
        cfg.set_deny_tables(vec!["users".to_string()]);
        let kept = apply(&cfg, fixture());
        let audit = kept.iter().find(|t| t.name() == "audit_log").unwrap();

        assert!(audit.foreign_keys().is_empty());
    }

    /// Passes if mutation denial is tracked separately from query visibility
    #[test]
    fn mutation_denial_is_separate() {
        let mut cfg = SchemaFilterConfig::default();
        cfg.set_deny_mutation_tables(vec!["audit_*".to_string()]);
        let kept = apply(&cfg, fixture());

        assert!(kept.iter().any(|t| t.name() == "audit_log"));
        assert!(mutation_denied(&cfg, "audit_log"));
        assert!(!mutation_denied(&cfg, "users"));
    }
}
