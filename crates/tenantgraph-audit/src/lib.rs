//! TenantGraph Audit: one immutable record per attempted database operation.
//!
//! Records capture who asked (tenant, user, session, request), what was
//! attempted (action classification, optionally the query text and
//! parameters), how long it took, and whether it succeeded. Each record is
//! content-hashed with BLAKE3 so persisted copies are tamper-evident.

pub mod hash;
pub mod recorder;
pub mod sink;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tenantgraph_core::{ActionKind, Params, TenantId};

pub use recorder::AuditRecorder;
pub use sink::{AuditSink, FanoutAuditSink, MemoryAuditSink, TracingAuditSink};
pub use store::{AuditQuery, JsonlAuditSink, StoreError};

/// Resource tag carried by every record produced for a database query.
pub const RESOURCE_DATABASE_QUERY: &str = "database_query";

/// Unique identifier for an audit record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AuditId(pub Uuid);

impl AuditId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One immutable fact about an attempted execution.
///
/// Built only through [`AuditRecorder`], which guarantees that `error` is
/// present exactly when `success` is false.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: AuditId,
    /// Always the tenant of the execution context that produced the record.
    pub tenant_id: TenantId,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Uuid,
    pub action: ActionKind,
    pub resource: String,
    pub query: Option<String>,
    pub parameters: Option<Params>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// BLAKE3 hash (hex) of every other field.
    pub content_hash: String,
}

impl AuditRecord {
    pub fn compute_hash(&self) -> String {
        hash::compute_record_hash(self)
    }

    /// Verify that the stored content_hash matches a freshly computed hash.
    pub fn verify_integrity(&self) -> bool {
        self.content_hash == self.compute_hash()
    }
}
