//! Database seam between the engine and the SQL back-end. The reflector, the
//! planner, and the resolvers all speak to the database through the
//! [`QueryFacility`] trait, which the MySQL endpoint implements and tests can
//! fake with canned rows.

pub mod mysql;

use crate::engine::value::Value;
use crate::error::Error;
use async_trait::async_trait;
use std::collections::HashMap;

/// One decoded result row: column name to internal value.
pub type Row = HashMap<String, Value>;

/// Outcome of a statement that does not return rows.
#[derive(Clone, Debug, Default)]
pub struct ExecOutcome {
    rows_affected: u64,
    last_insert_id: Option<u64>,
}

impl ExecOutcome {
    pub(crate) fn new(rows_affected: u64, last_insert_id: Option<u64>) -> ExecOutcome {
        ExecOutcome {
            rows_affected,
            last_insert_id,
        }
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }
}

/// SQL query facility consumed by the reflector and the resolvers. A facility
/// is bound to one session: either the shared pool, or a single checked-out
/// connection when the request is role-aware or transactional.
#[async_trait]
pub trait QueryFacility: Send + Sync {
    /// Runs a query and decodes every row.
    async fn fetch_rows(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Row>, Error>;

    /// Runs a statement, returning affected-row and insert-id metadata.
    async fn execute(&self, sql: &str, args: Vec<Value>) -> Result<ExecOutcome, Error>;

    /// Opens the mutation transaction if one is not already open. A no-op on
    /// pool-backed sessions.
    async fn begin(&self) -> Result<(), Error>;

    /// Commits the open transaction, if any.
    async fn commit(&self) -> Result<(), Error>;

    /// Rolls back the open transaction, if any.
    async fn rollback(&self) -> Result<(), Error>;

    /// Releases the session: rolls back any open transaction and restores the
    /// connection's default role before it returns to the pool.
    async fn release(&self) -> Result<(), Error>;
}
