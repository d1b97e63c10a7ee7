//! Per-request context for GraphQL execution: the SQL session, the snapshot
//! handle captured at request start, the batching context, and the caller's
//! database role.

use crate::engine::database::QueryFacility;
use crate::engine::loader::RowBatcher;
use crate::engine::reflect::model::Snapshot;
use crate::engine::schema::NodeType;
use crate::error::Error;
use juniper::Context;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity facts extracted from the HTTP request by upstream middleware. A
/// role is honored only when the middleware marked it validated.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    role: Option<String>,
    validated: bool,
}

impl RequestContext {
    pub fn new() -> RequestContext {
        RequestContext::default()
    }

    pub fn with_role(role: Option<String>, validated: bool) -> RequestContext {
        RequestContext { role, validated }
    }

    pub fn role(&self) -> Option<&String> {
        self.role.as_ref()
    }

    pub fn validated(&self) -> bool {
        self.validated
    }

    /// The role this request may actually assume.
    pub fn effective_role(&self) -> Option<&String> {
        if self.validated {
            self.role.as_ref()
        } else {
            None
        }
    }
}

/// Juniper context for one GraphQL request. Every resolver in the request
/// sees the same immutable snapshot and shares one SQL session and one
/// batching context.
pub struct GraphQLContext {
    session: Arc<dyn QueryFacility>,
    snapshot: Arc<Snapshot>,
    type_defs: Arc<HashMap<String, NodeType>>,
    batcher: RowBatcher,
    request: RequestContext,
}

impl GraphQLContext {
    pub(crate) fn new(
        session: Arc<dyn QueryFacility>,
        snapshot: Arc<Snapshot>,
        type_defs: Arc<HashMap<String, NodeType>>,
        request: RequestContext,
    ) -> GraphQLContext {
        let batcher = RowBatcher::new(session.clone(), snapshot.clone());
        GraphQLContext {
            session,
            snapshot,
            type_defs,
            batcher,
            request,
        }
    }

    pub(crate) fn session(&self) -> &dyn QueryFacility {
        self.session.as_ref()
    }

    pub(crate) fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub(crate) fn type_defs(&self) -> Arc<HashMap<String, NodeType>> {
        self.type_defs.clone()
    }

    pub(crate) fn batcher(&self) -> &RowBatcher {
        &self.batcher
    }

    pub(crate) fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Opens the mutation transaction if it is not already open. Called by
    /// every mutation resolver before its first statement.
    pub(crate) async fn ensure_transaction(&self) -> Result<(), Error> {
        self.session.begin().await
    }
}

impl Context for GraphQLContext {}

#[cfg(test)]
mod tests {
    use super::RequestContext;

    /// Passes if an unvalidated role is never honored
    #[test]
    fn unvalidated_role_ignored() {
        let ctx = RequestContext::with_role(Some("analyst".to_string()), false);

        assert!(ctx.effective_role().is_none());
        assert_eq!(Some(&"analyst".to_string()), ctx.role());
    }

    /// Passes if a validated role is honored
    #[test]
    fn validated_role_honored() {
        let ctx = RequestContext::with_role(Some("analyst".to_string()), true);

        assert_eq!(Some(&"analyst".to_string()), ctx.effective_role());
    }
}
