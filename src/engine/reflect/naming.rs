//! Deterministic mapping from SQL identifiers to GraphQL identifiers,
//! including reserved-word handling, collision numbering, and English
//! inflection with configurable overrides.

use inflector::Inflector;
use log::warn;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Words that cannot be used verbatim as GraphQL type or field names.
const RESERVED_WORDS: &[&str] = &[
    "query",
    "mutation",
    "type",
    "schema",
    "scalar",
    "enum",
    "input",
    "interface",
    "union",
    "fragment",
    "directive",
    "extend",
    "implements",
    "on",
    "true",
    "false",
    "null",
    "Int",
    "Float",
    "String",
    "Boolean",
    "ID",
];

/// Tracks every GraphQL name handed out for one snapshot build and resolves
/// collisions deterministically. All operations succeed; conflicts are
/// resolved by suffixing and logged as warnings.
#[derive(Debug, Default)]
pub struct NameRegistry {
    pluralize_overrides: BTreeMap<String, String>,
    singularize_overrides: BTreeMap<String, String>,
    type_names: HashSet<String>,
    query_names: HashSet<String>,
    fields: HashMap<String, HashSet<String>>,
}

impl NameRegistry {
    pub fn new(
        pluralize_overrides: BTreeMap<String, String>,
        singularize_overrides: BTreeMap<String, String>,
    ) -> NameRegistry {
        NameRegistry {
            pluralize_overrides,
            singularize_overrides,
            type_names: HashSet::new(),
            query_names: HashSet::new(),
            fields: HashMap::new(),
        }
    }

    /// Registers the GraphQL object type name for a table: singular
    /// PascalCase, reserved words escaped, collisions numbered.
    pub fn register_type(&mut self, table_name: &str) -> String {
        let base = sanitize(&self.singularize(table_name).to_pascal_case());
        let name = next_free(&base, &self.type_names);
        if name != base {
            warn!(
                "type name collision: table {} renamed to {}",
                table_name, name
            );
        }
        self.type_names.insert(name.clone());
        name
    }

    /// Registers a scalar field name for a column within a type.
    pub fn register_column_field(&mut self, type_name: &str, column_name: &str) -> String {
        let base = sanitize(&column_name.to_camel_case());
        self.claim_field(type_name, base)
    }

    /// Registers the field name for a primary-key column. A PK column that
    /// would be called `id` is renamed to `databaseId` so the `id` field
    /// remains free for the opaque node ID; fallbacks keep the name
    /// deterministic when `databaseId` is itself taken.
    pub fn register_pk_column_field(&mut self, type_name: &str, column_name: &str) -> String {
        let base = sanitize(&column_name.to_camel_case());
        if base != "id" {
            return self.claim_field(type_name, base);
        }
        let taken = self.fields.entry(type_name.to_string()).or_default();
        for candidate in DatabaseIdCandidates::new() {
            if !taken.contains(&candidate) {
                taken.insert(candidate.clone());
                if candidate != "databaseId" {
                    warn!(
                        "{}: databaseId already present, primary key field renamed to {}",
                        type_name, candidate
                    );
                }
                return candidate;
            }
        }
        unreachable!("databaseId candidate sequence is infinite")
    }

    /// Registers the field name for a relationship. When the base name
    /// collides with a column field, `Ref` (many-to-one) or `Rel` (all other
    /// kinds) is appended before collision numbering.
    pub fn register_relationship_field(
        &mut self,
        type_name: &str,
        base: &str,
        is_many_to_one: bool,
    ) -> String {
        let mut name = sanitize(&base.to_camel_case());
        let taken = self.fields.entry(type_name.to_string()).or_default();
        if taken.contains(&name) {
            name.push_str(if is_many_to_one { "Ref" } else { "Rel" });
        }
        self.claim_field(type_name, name)
    }

    /// Registers a root query field name: camelCase with reserved-word and
    /// collision handling against all previously registered query fields.
    pub fn register_query_field(&mut self, base: &str) -> String {
        let base = sanitize(&base.to_camel_case());
        let name = next_free(&base, &self.query_names);
        if name != base {
            warn!("query field collision: {} renamed to {}", base, name);
        }
        self.query_names.insert(name.clone());
        name
    }

    pub fn pluralize(&self, word: &str) -> String {
        if let Some(p) = self.pluralize_overrides.get(word) {
            return p.clone();
        }
        word.to_plural()
    }

    pub fn singularize(&self, word: &str) -> String {
        if let Some(s) = self.singularize_overrides.get(word) {
            return s.clone();
        }
        word.to_singular()
    }

    /// Name of the edge type linking two tables: the alphabetically-ordered
    /// singular forms, PascalCased and concatenated.
    pub fn edge_type_name(&self, table_a: &str, table_b: &str) -> String {
        let mut singles = [self.singularize(table_a), self.singularize(table_b)];
        singles.sort();
        format!(
            "{}{}",
            singles[0].to_pascal_case(),
            singles[1].to_pascal_case()
        )
    }

    /// Base name for a field that traverses a junction. The junction's own
    /// name is used when it is not simply composed of tokens from the two
    /// related tables; otherwise the target table name reads better.
    pub fn junction_field_base(
        &self,
        junction_table: &str,
        table_a: &str,
        table_b: &str,
        target_table: &str,
    ) -> String {
        if self.junction_named_after_tables(junction_table, table_a, table_b) {
            target_table.to_string()
        } else {
            junction_table.to_string()
        }
    }

    fn junction_named_after_tables(&self, junction: &str, table_a: &str, table_b: &str) -> bool {
        let mut known: HashSet<String> = HashSet::new();
        for t in [table_a, table_b] {
            for token in t.split('_') {
                known.insert(token.to_lowercase());
                known.insert(self.singularize(token).to_lowercase());
                known.insert(self.pluralize(token).to_lowercase());
            }
        }
        junction
            .split('_')
            .all(|token| known.contains(&token.to_lowercase()))
    }

    fn claim_field(&mut self, type_name: &str, base: String) -> String {
        let taken = self.fields.entry(type_name.to_string()).or_default();
        let name = next_free(&base, taken);
        if name != base {
            warn!("{}: field collision, {} renamed to {}", type_name, base, name);
        }
        taken.insert(name.clone());
        name
    }
}

/// Escapes reserved words, dunder prefixes, and the aggregate suffix by
/// appending an underscore.
fn sanitize(name: &str) -> String {
    if RESERVED_WORDS.contains(&name) || name.starts_with("__") || name.ends_with("_aggregate") {
        let mut escaped = name.to_string();
        escaped.push('_');
        escaped
    } else {
        name.to_string()
    }
}

/// Returns `base` if free, otherwise the candidate with the smallest integer
/// suffix >= 2 that is free.
fn next_free(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 2u64;
    loop {
        let candidate = format!("{}{}", base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// `databaseId`, `databaseId_raw`, `databaseId_raw2`, `databaseId_raw3`, …
struct DatabaseIdCandidates {
    next: u64,
}

impl DatabaseIdCandidates {
    fn new() -> Self {
        DatabaseIdCandidates { next: 0 }
    }
}

impl Iterator for DatabaseIdCandidates {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let candidate = match self.next {
            0 => "databaseId".to_string(),
            1 => "databaseId_raw".to_string(),
            n => format!("databaseId_raw{}", n),
        };
        self.next += 1;
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::NameRegistry;
    use maplit::btreemap;

    fn registry() -> NameRegistry {
        NameRegistry::new(Default::default(), Default::default())
    }

    /// Passes if table names become singular PascalCase type names
    #[test]
    fn type_names() {
        let mut r = registry();

        assert_eq!("User", r.register_type("users"));
        assert_eq!("OrderItem", r.register_type("order_items"));
    }

    /// Passes if a reserved word gets an underscore suffix
    #[test]
    fn reserved_type_name() {
        let mut r = registry();

        assert_eq!("String_", r.register_type("strings"));
    }

    /// Passes if colliding type names are numbered from 2 upward
    #[test]
    fn type_collisions_numbered() {
        let mut r = registry();

        assert_eq!("User", r.register_type("users"));
        assert_eq!("User2", r.register_type("user"));
        assert_eq!("User3", r.register_type("Users"));
    }

    /// Passes if a PK column named id is renamed, with the raw fallbacks when
    /// databaseId is taken
    #[test]
    fn database_id_fallbacks() {
        let mut r = registry();
        r.register_column_field("User", "database_id");

        assert_eq!("databaseId_raw", r.register_pk_column_field("User", "id"));

        let mut r2 = registry();

        assert_eq!("databaseId", r2.register_pk_column_field("User", "id"));
        // a second id-like PK column exhausts databaseId and databaseId_raw
        assert_eq!("databaseId_raw", r2.register_pk_column_field("User", "ID"));
        assert_eq!("databaseId_raw2", r2.register_pk_column_field("User", "Id"));
    }

    /// Passes if a relationship colliding with a column field picks up the
    /// Ref or Rel suffix
    #[test]
    fn relationship_suffixes() {
        let mut r = registry();
        r.register_column_field("Post", "author");

        assert_eq!(
            "authorRef",
            r.register_relationship_field("Post", "author", true)
        );
        assert_eq!(
            "authorRel",
            r.register_relationship_field("Post", "author", false)
        );
    }

    /// Passes if pluralize and singularize honor the override maps
    #[test]
    fn inflection_overrides() {
        let r = NameRegistry::new(
            btreemap! { "person".to_string() => "people".to_string() },
            btreemap! { "people".to_string() => "person".to_string() },
        );

        assert_eq!("people", r.pluralize("person"));
        assert_eq!("person", r.singularize("people"));
        assert_eq!("posts", r.pluralize("post"));
    }

    /// Passes if edge type names order their halves alphabetically
    #[test]
    fn edge_names_sorted() {
        let r = registry();

        assert_eq!("RoleUser", r.edge_type_name("users", "roles"));
        assert_eq!("RoleUser", r.edge_type_name("roles", "users"));
    }

    /// Passes if a junction named from its member tables yields the target
    /// name, while a bespoke junction name survives
    #[test]
    fn junction_field_base() {
        let r = registry();

        assert_eq!(
            "roles",
            r.junction_field_base("user_roles", "users", "roles", "roles")
        );
        assert_eq!(
            "memberships",
            r.junction_field_base("memberships", "users", "roles", "roles")
        );
    }

    /// Passes if query field registration escapes reserved words and numbers
    /// collisions
    #[test]
    fn query_fields() {
        let mut r = registry();

        assert_eq!("users", r.register_query_field("users"));
        assert_eq!("users2", r.register_query_field("users"));
        assert_eq!("on_", r.register_query_field("on"));
    }
}
