//! The tigql engine: schema reflection, snapshot management, and GraphQL
//! execution against the reflected schema. [`Engine`] binds one immutable
//! snapshot to a juniper root node; the snapshot manager swaps engines as the
//! upstream schema changes.

pub mod config;
pub mod context;
pub mod database;
pub mod loader;
pub mod objects;
pub mod plan;
pub mod reflect;
pub mod schema;
pub mod snapshot;
pub mod value;

use crate::engine::config::Config;
use crate::engine::context::{GraphQLContext, RequestContext};
use crate::engine::database::mysql::{MySqlEndpoint, SessionOptions};
use crate::engine::database::QueryFacility;
use crate::engine::reflect::model::Snapshot;
use crate::engine::schema::{NodeType, RootRef};
use crate::error::Error;
use futures::FutureExt;
use juniper::http::GraphQLRequest;
use log::{debug, error};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Determines whether a request document's first executed operation is a
/// mutation, which decides session shape before execution starts.
fn is_mutation(query: &str) -> bool {
    for line in query.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        return trimmed.starts_with("mutation");
    }
    false
}

/// One serving engine: an immutable snapshot plus the juniper root node
/// generated from it. Engines are shared behind `Arc` and replaced wholesale
/// when the snapshot manager publishes a rebuild.
pub struct Engine {
    snapshot: Arc<Snapshot>,
    root_node: RootRef,
    type_defs: Arc<HashMap<String, NodeType>>,
    endpoint: Arc<MySqlEndpoint>,
    config: Config,
}

impl Engine {
    pub(crate) fn new(
        snapshot: Arc<Snapshot>,
        endpoint: Arc<MySqlEndpoint>,
        config: Config,
    ) -> Engine {
        let (root_node, type_defs) =
            schema::create_root_node(&snapshot, &config.schema().filter);
        Engine {
            snapshot,
            root_node,
            type_defs,
            endpoint,
            config,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Executes one GraphQL request against this engine's snapshot.
    ///
    /// Session establishment follows the request: plain queries multiplex on
    /// the pool; role-aware or mutation requests check out one connection for
    /// the whole request. Mutations run inside a transaction that commits
    /// only when every top-level field succeeded.
    pub async fn execute(
        &self,
        query: String,
        operation_name: Option<String>,
        variables: Option<juniper::InputValue>,
        req_ctx: RequestContext,
    ) -> Result<serde_json::Value, Error> {
        debug!("Engine::execute -- operation: {:?}", operation_name);
        let mutation = is_mutation(&query);
        let request = GraphQLRequest::new(query, operation_name, variables);

        let mut opts = SessionOptions::new();
        if self.config.auth().db_roles.enabled {
            if let Some(role) = req_ctx.effective_role() {
                if !self.config.auth().db_roles.roles.contains(role) {
                    return Err(Error::RoleNotPermitted { role: role.clone() });
                }
                let (database, _) = self.config.effective_database()?;
                opts = opts.with_role(role.clone(), database);
            }
        }
        if mutation {
            opts = opts.with_transaction();
        }

        let session: Arc<dyn QueryFacility> =
            Arc::new(self.endpoint.session(opts).await?);
        let ctx = GraphQLContext::new(
            session.clone(),
            self.snapshot.clone(),
            self.type_defs.clone(),
            req_ctx,
        );

        let executed = AssertUnwindSafe(request.execute(&self.root_node, &ctx))
            .catch_unwind()
            .await;

        let outcome = match executed {
            Ok(response) => {
                let ok = response.is_ok();
                let body = serde_json::to_value(&response).map_err(|e| {
                    Error::TypeConversionFailed {
                        src: format!("response serialization: {}", e),
                        dst: "JSON".to_string(),
                    }
                });
                if mutation {
                    if ok && body.is_ok() {
                        session.commit().await?;
                    } else {
                        session.rollback().await.ok();
                    }
                }
                body
            }
            Err(panic) => {
                error!("resolver panicked: {:?}", panic);
                if mutation {
                    session.rollback().await.ok();
                }
                Err(Error::TransactionFinished)
            }
        };

        session.release().await.ok();
        outcome
    }
}
