//! Composes SQL for the lookup idioms the resolvers need: single-row by
//! primary key or unique index, batched collections by foreign key, seekable
//! connection pages, and vector-distance search. Placeholders are always
//! positional; identifier quoting comes from the SQL utilities in the
//! database layer.

use crate::engine::database::mysql::quote_ident;
use crate::engine::reflect::model::{FieldType, Relationship, Table};
use crate::engine::schema::ident::Direction;
use crate::engine::value::Value;
use crate::error::Error;

/// Alias of the parent-key column added to batched FK lookups.
pub const BATCH_PARENT_ID: &str = "__batch_parent_id";

/// Alias prefix for composite parent keys: `__batch_parent_0 …`.
pub const BATCH_PARENT_PREFIX: &str = "__batch_parent_";

/// Alias of the computed distance column in vector search pages.
pub const DISTANCE_ALIAS: &str = "__distance";

/// One planned statement: SQL text plus its positional arguments.
#[derive(Clone, Debug)]
pub struct Plan {
    sql: String,
    args: Vec<Value>,
}

impl Plan {
    fn new(sql: String, args: Vec<Value>) -> Plan {
        Plan { sql, args }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.args)
    }
}

/// The ordered sort columns of a connection: the primary sort from `orderBy`
/// followed by the PK tie-breaker ascending.
#[derive(Clone, Debug)]
pub struct OrderSpec {
    key: String,
    columns: Vec<(String, Direction)>,
}

impl OrderSpec {
    pub fn new(key: String, columns: Vec<(String, Direction)>) -> OrderSpec {
        OrderSpec { key, columns }
    }

    /// Builds the default ordering for a table: PK columns ascending.
    pub fn pk_ascending(table: &Table) -> OrderSpec {
        let columns: Vec<(String, Direction)> = table
            .primary_key_names()
            .into_iter()
            .map(|c| (c, Direction::Asc))
            .collect();
        OrderSpec::new("databaseId".to_string(), columns)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn columns(&self) -> &[(String, Direction)] {
        &self.columns
    }

    pub fn directions(&self) -> Vec<Direction> {
        self.columns.iter().map(|(_, d)| *d).collect()
    }
}

/// Select-list entry for one column, casting types the driver cannot decode
/// faithfully (TIME beyond 24h, VECTOR) to text.
fn select_term(table: &Table, column: &str, alias: Option<&str>) -> String {
    let qualified = match alias {
        Some(a) => format!("{}.{}", quote_ident(a), quote_ident(column)),
        None => quote_ident(column),
    };
    let cast = table
        .column(column)
        .map(|c| matches!(c.effective_type(), FieldType::Time | FieldType::Vector))
        .unwrap_or(false);
    if cast {
        format!("CAST({} AS CHAR) AS {}", qualified, quote_ident(column))
    } else {
        qualified
    }
}

fn select_list(table: &Table, alias: Option<&str>) -> String {
    table
        .columns()
        .iter()
        .map(|c| select_term(table, c.name(), alias))
        .collect::<Vec<_>>()
        .join(", ")
}

fn eq_conjunction(columns: &[String], alias: Option<&str>) -> String {
    columns
        .iter()
        .map(|c| match alias {
            Some(a) => format!("{}.{} = ?", quote_ident(a), quote_ident(c)),
            None => format!("{} = ?", quote_ident(c)),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Single row by primary key, single or composite.
pub fn single_by_pk(table: &Table, pk_values: Vec<Value>) -> Result<Plan, Error> {
    let pk = table.primary_key_names();
    if pk.is_empty() || pk.len() != pk_values.len() {
        return Err(Error::InputItemNotFound {
            name: format!("{} primary key", table.name()),
        });
    }
    let sql = format!(
        "SELECT {} FROM {} WHERE {} LIMIT 1",
        select_list(table, None),
        quote_ident(table.name()),
        eq_conjunction(&pk, None),
    );
    Ok(Plan::new(sql, pk_values))
}

/// Single row by a single-column unique index.
pub fn single_by_unique(table: &Table, column: &str, value: Value) -> Plan {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ? LIMIT 1",
        select_list(table, None),
        quote_ident(table.name()),
        quote_ident(column),
    );
    Plan::new(sql, vec![value])
}

/// Collection by foreign key for batched many-to-one dataloading. The parent
/// key is returned as an extra aliased column so rows can be regrouped by
/// caller.
pub fn children_by_fk_batch(
    table: &Table,
    fk_columns: &[String],
    parent_keys: &[Vec<Value>],
) -> Result<Plan, Error> {
    if fk_columns.is_empty() || parent_keys.is_empty() {
        return Err(Error::InputItemNotFound {
            name: format!("{} foreign key batch", table.name()),
        });
    }
    let mut args = Vec::new();
    let (aliases, predicate) = if fk_columns.len() == 1 {
        let alias = format!(
            "{} AS {}",
            quote_ident(&fk_columns[0]),
            quote_ident(BATCH_PARENT_ID)
        );
        let marks = vec!["?"; parent_keys.len()].join(", ");
        for key in parent_keys {
            args.push(key[0].clone());
        }
        (
            alias,
            format!("{} IN ({})", quote_ident(&fk_columns[0]), marks),
        )
    } else {
        let alias = fk_columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{} AS {}",
                    quote_ident(c),
                    quote_ident(&format!("{}{}", BATCH_PARENT_PREFIX, i))
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let group = format!("({})", eq_conjunction(fk_columns, None));
        let groups = vec![group; parent_keys.len()].join(" OR ");
        for key in parent_keys {
            args.extend(key.iter().cloned());
        }
        (alias, groups)
    };
    let sql = format!(
        "SELECT {}, {} FROM {} WHERE {}",
        select_list(table, None),
        aliases,
        quote_ident(table.name()),
        predicate,
    );
    Ok(Plan::new(sql, args))
}

/// Lexicographic seek predicate over the order columns, supporting mixed
/// ASC/DESC. Produces `(c0 > v0) OR (c0 = v0 AND c1 > v1) OR …` with the
/// comparator flipped for descending columns.
fn seek_predicate(
    order: &[(String, Direction)],
    values: &[Value],
    alias: Option<&str>,
) -> Result<(String, Vec<Value>), Error> {
    if order.len() != values.len() {
        return Err(Error::CursorNotParsed {
            reason: format!(
                "cursor carries {} values for {} sort columns",
                values.len(),
                order.len()
            ),
        });
    }
    let term = |c: &str| match alias {
        Some(a) => format!("{}.{}", quote_ident(a), quote_ident(c)),
        None => quote_ident(c),
    };
    let mut groups = Vec::with_capacity(order.len());
    let mut args = Vec::new();
    for i in 0..order.len() {
        let mut parts = Vec::with_capacity(i + 1);
        for (j, (col, _)) in order.iter().take(i).enumerate() {
            parts.push(format!("{} = ?", term(col)));
            args.push(values[j].clone());
        }
        let (col, dir) = &order[i];
        let op = match dir {
            Direction::Asc => ">",
            Direction::Desc => "<",
        };
        parts.push(format!("{} {} ?", term(col), op));
        args.push(values[i].clone());
        groups.push(format!("({})", parts.join(" AND ")));
    }
    Ok((groups.join(" OR "), args))
}

fn order_clause(order: &OrderSpec, alias: Option<&str>) -> String {
    order
        .columns()
        .iter()
        .map(|(c, d)| match alias {
            Some(a) => format!("{}.{} {}", quote_ident(a), quote_ident(c), d.as_str()),
            None => format!("{} {}", quote_ident(c), d.as_str()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Connection-style page: stable order, optional seek from a cursor, and
/// `LIMIT first+1` so the resolver can detect `hasNextPage`. An optional FK
/// equality restricts the page to one parent (one-to-many traversal).
pub fn connection_page(
    table: &Table,
    order: &OrderSpec,
    cursor_values: Option<Vec<Value>>,
    first: i64,
    parent: Option<(&[String], Vec<Value>)>,
) -> Result<Plan, Error> {
    let mut predicates = Vec::new();
    let mut args = Vec::new();
    if let Some((cols, vals)) = parent {
        predicates.push(eq_conjunction(cols, None));
        args.extend(vals);
    }
    if let Some(values) = cursor_values {
        let (seek, seek_args) = seek_predicate(order.columns(), &values, None)?;
        predicates.push(format!("({})", seek));
        args.extend(seek_args);
    }
    let where_clause = if predicates.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicates.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} LIMIT {}",
        select_list(table, None),
        quote_ident(table.name()),
        where_clause,
        order_clause(order, None),
        first + 1,
    );
    Ok(Plan::new(sql, args))
}

/// Many-to-many page: joins through the junction and pages the remote table
/// with the same seek discipline as a plain connection.
pub fn junction_page(
    remote: &Table,
    rel: &Relationship,
    junction: &Table,
    local_key: Vec<Value>,
    order: &OrderSpec,
    cursor_values: Option<Vec<Value>>,
    first: i64,
) -> Result<Plan, Error> {
    let junction_name = junction.name();
    // the junction FK pointing away from the local table carries the remote keys
    let (to_remote_local, to_remote_remote) = junction_fk_columns(junction, rel, remote)?;
    let (to_local_cols, _) = junction_fk_columns_for_local(junction, rel)?;

    let join_on = to_remote_local
        .iter()
        .zip(to_remote_remote.iter())
        .map(|(j, r)| {
            format!(
                "j.{} = r.{}",
                quote_ident(j),
                quote_ident(r)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    let mut predicates = vec![eq_conjunction(&to_local_cols, Some("j"))];
    let mut args = local_key;
    if let Some(values) = cursor_values {
        let (seek, seek_args) = seek_predicate(order.columns(), &values, Some("r"))?;
        predicates.push(format!("({})", seek));
        args.extend(seek_args);
    }
    let sql = format!(
        "SELECT {} FROM {} AS j JOIN {} AS r ON {} WHERE {} ORDER BY {} LIMIT {}",
        select_list_aliased(remote, "r"),
        quote_ident(junction_name),
        quote_ident(remote.name()),
        join_on,
        predicates.join(" AND "),
        order_clause(order, Some("r")),
        first + 1,
    );
    Ok(Plan::new(sql, args))
}

fn select_list_aliased(table: &Table, alias: &str) -> String {
    table
        .columns()
        .iter()
        .map(|c| {
            let term = select_term(table, c.name(), Some(alias));
            if term.starts_with("CAST(") {
                term
            } else {
                format!("{} AS {}", term, quote_ident(c.name()))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn junction_fk_columns(
    junction: &Table,
    rel: &Relationship,
    remote: &Table,
) -> Result<(Vec<String>, Vec<String>), Error> {
    junction
        .foreign_keys()
        .iter()
        .find(|fk| fk.referenced_table() == remote.name())
        .map(|fk| (fk.columns().to_vec(), fk.referenced_columns().to_vec()))
        .ok_or_else(|| Error::SchemaItemNotFound {
            name: format!("{} -> {}", rel.local_table(), remote.name()),
        })
}

fn junction_fk_columns_for_local(
    junction: &Table,
    rel: &Relationship,
) -> Result<(Vec<String>, Vec<String>), Error> {
    junction
        .foreign_keys()
        .iter()
        .find(|fk| fk.referenced_table() == rel.local_table())
        .map(|fk| (fk.columns().to_vec(), fk.referenced_columns().to_vec()))
        .ok_or_else(|| Error::SchemaItemNotFound {
            name: format!("{} -> {}", junction.name(), rel.local_table()),
        })
}

/// `SELECT COUNT(*)` for connection `totalCount`, with the same optional
/// parent restriction as the page itself.
pub fn count(table: &Table, parent: Option<(&[String], Vec<Value>)>) -> Plan {
    let (where_clause, args) = match parent {
        Some((cols, vals)) => (format!(" WHERE {}", eq_conjunction(cols, None)), vals),
        None => (String::new(), Vec::new()),
    };
    let sql = format!(
        "SELECT COUNT(*) AS {} FROM {}{}",
        quote_ident("__count"),
        quote_ident(table.name()),
        where_clause,
    );
    Plan::new(sql, args)
}

/// Vector search page: injects the computed distance column, orders by
/// `(distance ASC, pk ASC)`, and seeks from a cursor whose leading value is
/// the distance.
pub fn vector_search_page(
    table: &Table,
    vector_column: &str,
    query_vector: String,
    cursor_values: Option<Vec<Value>>,
    first: i64,
) -> Result<Plan, Error> {
    let pk = table.primary_key_names();
    if pk.is_empty() {
        return Err(Error::SchemaItemNotFound {
            name: format!("{} primary key", table.name()),
        });
    }
    let distance_expr = format!(
        "VEC_COSINE_DISTANCE({}, ?)",
        quote_ident(vector_column)
    );
    let mut args: Vec<Value> = vec![Value::String(query_vector.clone())];
    let mut where_clause = String::new();
    if let Some(values) = cursor_values {
        if values.len() != pk.len() + 1 {
            return Err(Error::CursorNotParsed {
                reason: format!(
                    "vector cursor carries {} values for distance plus {} key columns",
                    values.len(),
                    pk.len()
                ),
            });
        }
        // lexicographic seek over (distance, pk…); the distance expression
        // repeats because it cannot be referenced by alias in WHERE
        let mut order: Vec<(String, Direction)> = vec![(distance_expr.clone(), Direction::Asc)];
        order.extend(pk.iter().map(|c| (quote_ident(c), Direction::Asc)));
        let mut groups = Vec::new();
        for i in 0..order.len() {
            let mut parts = Vec::new();
            for (j, (term, _)) in order.iter().take(i).enumerate() {
                parts.push(format!("{} = ?", term));
                if j == 0 {
                    args.push(Value::String(query_vector.clone()));
                }
                args.push(values[j].clone());
            }
            let (term, _) = &order[i];
            parts.push(format!("{} > ?", term));
            if i == 0 {
                args.push(Value::String(query_vector.clone()));
            }
            args.push(values[i].clone());
            groups.push(format!("({})", parts.join(" AND ")));
        }
        where_clause = format!(" WHERE {}", groups.join(" OR "));
    }
    let order_by = std::iter::once(format!("{} ASC", quote_ident(DISTANCE_ALIAS)))
        .chain(pk.iter().map(|c| format!("{} ASC", quote_ident(c))))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {}, {} AS {} FROM {}{} ORDER BY {} LIMIT {}",
        select_list(table, None),
        distance_expr,
        quote_ident(DISTANCE_ALIAS),
        quote_ident(table.name()),
        where_clause,
        order_by,
        first + 1,
    );
    Ok(Plan::new(sql, args))
}

/// INSERT for a mutation input.
pub fn insert(table: &Table, columns: &[String], values: Vec<Value>) -> Plan {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let marks = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table.name()),
        cols,
        marks,
    );
    Plan::new(sql, values)
}

/// UPDATE by primary key for a mutation patch.
pub fn update(
    table: &Table,
    set_columns: &[String],
    set_values: Vec<Value>,
    pk_values: Vec<Value>,
) -> Result<Plan, Error> {
    let pk = table.primary_key_names();
    if pk.is_empty() || pk.len() != pk_values.len() {
        return Err(Error::InputItemNotFound {
            name: format!("{} primary key", table.name()),
        });
    }
    let sets = set_columns
        .iter()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut args = set_values;
    args.extend(pk_values);
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(table.name()),
        sets,
        eq_conjunction(&pk, None),
    );
    Ok(Plan::new(sql, args))
}

/// DELETE by primary key.
pub fn delete(table: &Table, pk_values: Vec<Value>) -> Result<Plan, Error> {
    let pk = table.primary_key_names();
    if pk.is_empty() || pk.len() != pk_values.len() {
        return Err(Error::InputItemNotFound {
            name: format!("{} primary key", table.name()),
        });
    }
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(table.name()),
        eq_conjunction(&pk, None),
    );
    Ok(Plan::new(sql, pk_values))
}

#[cfg(test)]
mod tests {
    use super::{
        children_by_fk_batch, connection_page, single_by_pk, single_by_unique, update,
        vector_search_page, OrderSpec,
    };
    use crate::engine::reflect::model::{Column, Table};
    use crate::engine::schema::ident::Direction;
    use crate::engine::value::Value;

    fn column(table: &str, name: &str, pk: bool) -> Column {
        Column::new(
            table.to_string(),
            name.to_string(),
            "bigint".to_string(),
            "bigint(20)".to_string(),
            false,
            None,
            pk,
        )
    }

    fn posts() -> Table {
        Table::new(
            "posts".to_string(),
            false,
            vec![
                column("posts", "id", true),
                column("posts", "author_id", false),
                Column::new(
                    "posts".to_string(),
                    "created_at".to_string(),
                    "datetime".to_string(),
                    "datetime".to_string(),
                    false,
                    None,
                    false,
                ),
            ],
            Vec::new(),
            Vec::new(),
        )
    }

    /// Passes if the PK plan uses positional placeholders and a limit
    #[test]
    fn pk_lookup() {
        let plan = single_by_pk(&posts(), vec![Value::Int64(5)]).unwrap();

        assert_eq!(
            "SELECT `id`, `author_id`, `created_at` FROM `posts` WHERE `id` = ? LIMIT 1",
            plan.sql()
        );
        assert_eq!(1, plan.args().len());
    }

    /// Passes if a unique-index lookup binds its single argument
    #[test]
    fn unique_lookup() {
        let plan = single_by_unique(&posts(), "author_id", Value::Int64(9));

        assert!(plan.sql().contains("WHERE `author_id` = ? LIMIT 1"));
    }

    /// Passes if single-column batches use IN with the aliased parent key
    #[test]
    fn fk_batch_single() {
        let plan = children_by_fk_batch(
            &posts(),
            &["author_id".to_string()],
            &[vec![Value::Int64(1)], vec![Value::Int64(2)]],
        )
        .unwrap();

        assert!(plan.sql().contains("`author_id` AS `__batch_parent_id`"));
        assert!(plan.sql().contains("WHERE `author_id` IN (?, ?)"));
        assert_eq!(2, plan.args().len());
    }

    /// Passes if composite batches alias each parent key part and group with
    /// OR
    #[test]
    fn fk_batch_composite() {
        let plan = children_by_fk_batch(
            &posts(),
            &["author_id".to_string(), "id".to_string()],
            &[
                vec![Value::Int64(1), Value::Int64(10)],
                vec![Value::Int64(2), Value::Int64(20)],
            ],
        )
        .unwrap();

        assert!(plan.sql().contains("AS `__batch_parent_0`"));
        assert!(plan.sql().contains("AS `__batch_parent_1`"));
        assert!(plan
            .sql()
            .contains("(`author_id` = ? AND `id` = ?) OR (`author_id` = ? AND `id` = ?)"));
        assert_eq!(4, plan.args().len());
    }

    /// Passes if a first page orders stably and over-fetches by one
    #[test]
    fn connection_first_page() {
        let order = OrderSpec::new(
            "createdAt_databaseId".to_string(),
            vec![
                ("created_at".to_string(), Direction::Desc),
                ("id".to_string(), Direction::Asc),
            ],
        );
        let plan = connection_page(&posts(), &order, None, 10, None).unwrap();

        assert!(plan
            .sql()
            .ends_with("ORDER BY `created_at` DESC, `id` ASC LIMIT 11"));
        assert!(plan.args().is_empty());
    }

    /// Passes if a cursored page emits the lexicographic seek predicate with
    /// flipped comparators for descending columns
    #[test]
    fn connection_seek() {
        let order = OrderSpec::new(
            "createdAt_databaseId".to_string(),
            vec![
                ("created_at".to_string(), Direction::Desc),
                ("id".to_string(), Direction::Asc),
            ],
        );
        let plan = connection_page(
            &posts(),
            &order,
            Some(vec![
                Value::String("2024-01-15 10:30:00".to_string()),
                Value::Int64(7),
            ]),
            5,
            None,
        )
        .unwrap();

        assert!(plan.sql().contains(
            "((`created_at` < ?) OR (`created_at` = ? AND `id` > ?))"
        ));
        assert_eq!(3, plan.args().len());
        assert!(plan.sql().ends_with("LIMIT 6"));
    }

    /// Passes if a one-to-many page restricts to the parent key
    #[test]
    fn connection_with_parent() {
        let order = OrderSpec::pk_ascending(&posts());
        let plan = connection_page(
            &posts(),
            &order,
            None,
            3,
            Some((&["author_id".to_string()], vec![Value::Int64(4)])),
        )
        .unwrap();

        assert!(plan.sql().contains("WHERE `author_id` = ?"));
        assert!(plan.sql().ends_with("LIMIT 4"));
    }

    /// Passes if updates bind set values before key values
    #[test]
    fn update_binds_in_order() {
        let plan = update(
            &posts(),
            &["author_id".to_string()],
            vec![Value::Int64(8)],
            vec![Value::Int64(3)],
        )
        .unwrap();

        assert_eq!(
            "UPDATE `posts` SET `author_id` = ? WHERE `id` = ?",
            plan.sql()
        );
        assert_eq!(&[Value::Int64(8), Value::Int64(3)][..], plan.args());
    }

    /// Passes if vector search injects the distance column, orders by it with
    /// the PK tie-breaker, and seeks from a distance-led cursor
    #[test]
    fn vector_page() {
        let plan = vector_search_page(&posts(), "embedding", "[1,2]".to_string(), None, 5).unwrap();

        assert!(plan
            .sql()
            .contains("VEC_COSINE_DISTANCE(`embedding`, ?) AS `__distance`"));
        assert!(plan
            .sql()
            .ends_with("ORDER BY `__distance` ASC, `id` ASC LIMIT 6"));

        let seeked = vector_search_page(
            &posts(),
            "embedding",
            "[1,2]".to_string(),
            Some(vec![
                Value::String("0.42".to_string()),
                Value::Int64(9),
            ]),
            5,
        )
        .unwrap();

        assert!(seeked.sql().contains("WHERE"));
        // distance value plus pk value, with the query vector re-bound for
        // each distance comparison
        assert!(seeked.args().len() > 3);
    }
}
