//! BLAKE3 content hashing for tamper evidence.
//!
//! Computes a deterministic hash of all record fields (excluding the
//! content_hash itself) so that any modification is detectable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use tenantgraph_core::{ActionKind, Params, TenantId};

use crate::{AuditId, AuditRecord};

/// Hashable representation of an AuditRecord (excludes content_hash).
#[derive(Serialize)]
struct HashableRecord<'a> {
    id: &'a AuditId,
    tenant_id: &'a TenantId,
    user_id: &'a Option<String>,
    session_id: &'a Option<String>,
    request_id: &'a Uuid,
    action: &'a ActionKind,
    resource: &'a str,
    query: &'a Option<String>,
    parameters: &'a Option<Params>,
    timestamp: &'a DateTime<Utc>,
    success: bool,
    error: &'a Option<String>,
    duration_ms: u64,
}

/// Serializes all fields except `content_hash` to JSON and hashes the bytes
/// with BLAKE3. Returns the hex-encoded hash.
pub fn compute_record_hash(record: &AuditRecord) -> String {
    let hashable = HashableRecord {
        id: &record.id,
        tenant_id: &record.tenant_id,
        user_id: &record.user_id,
        session_id: &record.session_id,
        request_id: &record.request_id,
        action: &record.action,
        resource: &record.resource,
        query: &record.query,
        parameters: &record.parameters,
        timestamp: &record.timestamp,
        success: record.success,
        error: &record.error,
        duration_ms: record.duration_ms,
    };

    let mut hasher = blake3::Hasher::new();
    if let Err(e) = serde_json::to_writer(&mut hasher, &hashable) {
        tracing::error!(error = %e, "Audit record hashing failed");
    }
    hasher.finalize().to_hex().to_string()
}
