//! Core domain types shared by the executor, the audit trail and the adapter.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecutionError;

/// Bound query parameters, keyed by name.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// One result record: column name to value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

// ── Tenant ────────────────────────────────────────────────────────

/// Opaque, caller-supplied tenant identifier. Never empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, ExecutionError> {
        if raw.trim().is_empty() {
            return Err(ExecutionError::Validation(
                "tenantId must not be empty".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One isolated logical graph partition, stored as a `TenantNamespace` node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TenantNamespace {
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Execution Context ─────────────────────────────────────────────

/// Identity and correlation data for one call.
///
/// Owned by the caller and passed into the executor; only ever persisted
/// as part of an audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub tenant_id: TenantId,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            user_id: None,
            session_id: None,
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

// ── Actions ───────────────────────────────────────────────────────

/// Coarse classification of what a statement does, for auditing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Create,
    Read,
    Update,
    Delete,
    Query,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Query => "QUERY",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Operations ────────────────────────────────────────────────────

/// Locates a relationship endpoint by label and a single property match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRef {
    pub label: String,
    pub key: String,
    pub value: serde_json::Value,
}

/// An operation requested through the adapter, tagged at the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    EnsureNamespace,
    CreateNode {
        label: String,
        #[serde(default)]
        properties: serde_json::Value,
    },
    CreateRelationship {
        from: NodeRef,
        to: NodeRef,
        relationship_type: String,
        #[serde(default)]
        properties: serde_json::Value,
    },
    RunQuery {
        query: String,
        #[serde(default)]
        parameters: Params,
    },
    GetSchema,
    Backup,
}

impl Operation {
    /// Tool name as exposed by the adapter.
    pub fn name(&self) -> &'static str {
        match self {
            Self::EnsureNamespace => "create_namespace",
            Self::CreateNode { .. } => "create_node",
            Self::CreateRelationship { .. } => "create_relationship",
            Self::RunQuery { .. } => "execute_query",
            Self::GetSchema => "get_schema",
            Self::Backup => "backup_data",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_rejects_blank() {
        assert!(TenantId::parse("").is_err());
        assert!(TenantId::parse("   ").is_err());
        assert_eq!(TenantId::parse("proj-A").unwrap().as_str(), "proj-A");
    }

    #[test]
    fn context_request_ids_are_unique() {
        let tid = TenantId::parse("t1").unwrap();
        let a = ExecutionContext::new(tid.clone());
        let b = ExecutionContext::new(tid).with_user("ann").with_session("s-1");
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(b.user_id.as_deref(), Some("ann"));
        assert_eq!(b.session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn action_kind_serializes_uppercase() {
        let json = serde_json::to_string(&ActionKind::Delete).unwrap();
        assert_eq!(json, "\"DELETE\"");
    }

    #[test]
    fn operation_is_tagged() {
        let op: Operation = serde_json::from_value(serde_json::json!({
            "operation": "create_node",
            "label": "User",
            "properties": {"name": "Ann"}
        }))
        .unwrap();
        assert_eq!(op.name(), "create_node");
        assert!(matches!(op, Operation::CreateNode { ref label, .. } if label == "User"));
    }
}
