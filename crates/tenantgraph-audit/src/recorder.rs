//! Builder for audit records.
//!
//! The executor opens a recorder when an execution starts and finalizes it
//! exactly once, as either a success or a failure:
//!
//! ```
//! # use tenantgraph_audit::AuditRecorder;
//! # use tenantgraph_core::{ActionKind, ExecutionContext, TenantId};
//! let ctx = ExecutionContext::new(TenantId::parse("proj-A").unwrap()).with_user("ann");
//! let record = AuditRecorder::new(&ctx, ActionKind::Read)
//!     .query("MATCH (u:User) RETURN u.name")
//!     .succeeded(12);
//! assert!(record.success);
//! assert!(record.error.is_none());
//! assert!(record.verify_integrity());
//! ```

use chrono::Utc;

use tenantgraph_core::{ActionKind, ExecutionContext, Params};

use crate::{AuditId, AuditRecord, RESOURCE_DATABASE_QUERY};

/// Collects the details of one execution attempt until it is finalized.
pub struct AuditRecorder {
    record: AuditRecord,
}

impl AuditRecorder {
    pub fn new(ctx: &ExecutionContext, action: ActionKind) -> Self {
        Self {
            record: AuditRecord {
                id: AuditId::new(),
                tenant_id: ctx.tenant_id.clone(),
                user_id: ctx.user_id.clone(),
                session_id: ctx.session_id.clone(),
                request_id: ctx.request_id,
                action,
                resource: RESOURCE_DATABASE_QUERY.to_string(),
                query: None,
                parameters: None,
                timestamp: Utc::now(),
                success: false,
                error: None,
                duration_ms: 0,
                content_hash: String::new(),
            },
        }
    }

    /// Persist the raw query text with the record.
    pub fn query(mut self, text: impl Into<String>) -> Self {
        self.record.query = Some(text.into());
        self
    }

    /// Persist the bound parameters with the record.
    pub fn parameters(mut self, params: Params) -> Self {
        self.record.parameters = Some(params);
        self
    }

    /// The record ID (available before finalization).
    pub fn id(&self) -> AuditId {
        self.record.id
    }

    pub fn succeeded(mut self, duration_ms: u64) -> AuditRecord {
        self.record.success = true;
        self.record.error = None;
        self.finalize(duration_ms)
    }

    pub fn failed(mut self, duration_ms: u64, error: &str) -> AuditRecord {
        let message = if error.trim().is_empty() {
            "unknown error".to_string()
        } else {
            error.to_string()
        };
        self.record.success = false;
        self.record.error = Some(message);
        self.finalize(duration_ms)
    }

    fn finalize(mut self, duration_ms: u64) -> AuditRecord {
        self.record.duration_ms = duration_ms;
        self.record.content_hash = self.record.compute_hash();
        self.record
    }
}
