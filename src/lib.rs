//! tigql exposes a TiDB or MySQL database as a strongly-typed GraphQL API.
//! It introspects the live schema, classifies relationships and junction
//! tables, synthesizes object types with Relay-style connections, and serves
//! requests by planning SQL against the reflected schema. Snapshots are
//! rebuilt periodically so upstream DDL shows up without a restart, and
//! role-scoped schemas are served per authenticated caller.

pub use engine::config::Config;
pub use engine::snapshot::SnapshotManager;
pub use engine::Engine;
pub use error::{Error, ErrorCode};

pub mod engine;
mod error;
pub mod lifecycle;
pub mod server;
