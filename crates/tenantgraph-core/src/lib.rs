//! tenantgraph-core: Shared types, configuration, and error handling for TenantGraph.
//!
//! This crate provides the foundational types used across all TenantGraph crates:
//! - Tenant identity and the per-call execution context
//! - The tagged `Operation` variants exposed to the protocol adapter
//! - The execution error taxonomy
//! - Layered configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::TenantGraphConfig;
pub use error::{ConfigError, ExecutionError};
pub use types::{
    ActionKind, ExecutionContext, NodeRef, Operation, Params, Row, TenantId, TenantNamespace,
};
