//! TenantGraph Graph: tenant-isolated, audited query execution against Neo4j.
//!
//! This crate is the single path between the protocol adapter and the graph
//! database. Every statement is policy-checked, scoped to the caller's
//! tenant, executed on its own session and recorded in the audit trail.

pub mod classify;
pub mod client;
pub mod executor;
pub mod guard;
pub mod isolation;
pub mod operations;
pub mod session;
pub mod statement;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::classify;
pub use client::GraphClient;
pub use executor::{QueryExecutor, QueryResult};
pub use guard::QueryGuard;
pub use isolation::{IsolationFilter, ScopedQuery, TENANT_PARAM, TENANT_PROPERTY};
pub use operations::{BackupRelationship, SchemaDescription, TenantBackup};
pub use session::{GraphSession, SessionFactory};
pub use statement::Statement;
