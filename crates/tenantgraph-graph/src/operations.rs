//! Namespace, schema and backup operations.
//!
//! These run fixed queries directly on an acquired session and bypass the
//! isolation filter: namespace and backup embed `$tenantId` in their own
//! text, and schema is global. Each call is audited like an executor call.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tenantgraph_core::{
    ActionKind, ExecutionContext, ExecutionError, Params, Row, TenantId, TenantNamespace,
};

use crate::executor::QueryExecutor;
use crate::isolation::TENANT_PARAM;
use crate::session::settle;

const ENSURE_NAMESPACE: &str = "MERGE (t:TenantNamespace {tenantId: $tenantId})
     ON CREATE SET t.createdAt = $now, t.updatedAt = $now
     ON MATCH SET t.updatedAt = $now
     RETURN t.tenantId AS tenantId, t.createdAt AS createdAt, t.updatedAt AS updatedAt";

const NAMESPACE_CONSTRAINT: &str = "CREATE CONSTRAINT tenant_namespace_id IF NOT EXISTS
     FOR (t:TenantNamespace) REQUIRE t.tenantId IS UNIQUE";

const SCHEMA: &str = "CALL db.schema.visualization() YIELD nodes, relationships
     RETURN [n IN nodes | {labels: labels(n), properties: properties(n)}] AS nodes,
            [r IN relationships | {type: type(r),
                                   start: labels(startNode(r)),
                                   end: labels(endNode(r))}] AS relationships";

const BACKUP_NODES: &str = "MATCH (n) WHERE n.tenantId = $tenantId
     RETURN labels(n) AS labels, properties(n) AS properties";

const BACKUP_RELATIONSHIPS: &str = "MATCH (a)-[r]->(b)
     WHERE a.tenantId = $tenantId AND b.tenantId = $tenantId
     RETURN properties(a) AS from,
            {type: type(r), properties: properties(r)} AS relationship,
            properties(b) AS to";

/// The database's label and relationship-type shape.
///
/// Global: NOT filtered by tenant, whichever tenant asked for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemaDescription {
    pub nodes: Vec<Value>,
    pub relationships: Vec<Value>,
}

/// One relationship in a backup, with both endpoints' properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRelationship {
    pub from: Value,
    pub relationship: Value,
    pub to: Value,
}

/// Everything one tenant owns, as a single serializable document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantBackup {
    pub tenant_id: TenantId,
    pub timestamp: DateTime<Utc>,
    pub nodes: Vec<Value>,
    pub relationships: Vec<BackupRelationship>,
}

impl TenantBackup {
    pub fn to_json_pretty(&self) -> Result<String, ExecutionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl QueryExecutor {
    // ── Namespace ────────────────────────────────────────────────

    /// Create the tenant's namespace if absent, otherwise touch `updatedAt`.
    pub async fn ensure_namespace(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<TenantNamespace, ExecutionError> {
        let mut params = tenant_params(&ctx.tenant_id);
        params.insert("now".to_string(), Value::String(Utc::now().to_rfc3339()));

        let recorder = self.recorder(ctx, ActionKind::Create, ENSURE_NAMESPACE, &params);
        let started = Instant::now();

        let outcome = match self.sessions.open().await {
            Ok(mut session) => {
                let rows = session.run(ENSURE_NAMESPACE, &params).await;
                settle(session, rows.and_then(parse_namespace)).await
            }
            Err(e) => Err(e),
        };

        let (namespace, _) = self.finish(recorder, started, outcome)?;
        tracing::info!(tenant_id = %namespace.tenant_id, "Tenant namespace ensured");
        Ok(namespace)
    }

    /// Install the uniqueness constraint that keeps concurrent
    /// `ensure_namespace` calls from duplicating a namespace. Audited under
    /// the caller's context like any other schema write.
    pub async fn ensure_namespace_constraint(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<(), ExecutionError> {
        let params = Params::new();
        let recorder = self.recorder(ctx, ActionKind::Create, NAMESPACE_CONSTRAINT, &params);
        let started = Instant::now();

        let outcome = match self.sessions.open().await {
            Ok(mut session) => {
                let rows = session.run(NAMESPACE_CONSTRAINT, &params).await;
                settle(session, rows.map(|_| ())).await
            }
            Err(e) => Err(e),
        };

        self.finish(recorder, started, outcome).map(|_| ())
    }

    // ── Schema ───────────────────────────────────────────────────

    /// Fetch the global schema visualization. The result is not scoped to
    /// the caller's tenant.
    pub async fn get_schema(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<SchemaDescription, ExecutionError> {
        tracing::debug!(
            tenant_id = %ctx.tenant_id,
            "Schema requested; result covers the whole database"
        );
        let recorder = self.recorder(ctx, ActionKind::Read, SCHEMA, &Params::new());
        let started = Instant::now();

        let outcome = match self.sessions.open().await {
            Ok(mut session) => {
                let rows = session.run(SCHEMA, &Params::new()).await;
                settle(session, rows.and_then(parse_schema)).await
            }
            Err(e) => Err(e),
        };

        let (schema, _) = self.finish(recorder, started, outcome)?;
        Ok(schema)
    }

    // ── Backup ───────────────────────────────────────────────────

    /// Export every node and relationship tagged with the caller's tenant.
    /// A failure in either read aborts the whole backup.
    pub async fn backup_tenant(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<TenantBackup, ExecutionError> {
        let params = tenant_params(&ctx.tenant_id);
        let recorder = self.recorder(ctx, ActionKind::Read, BACKUP_NODES, &params);
        let started = Instant::now();

        let outcome = match self.sessions.open().await {
            Ok(mut session) => {
                let reads = async {
                    let nodes = session.run(BACKUP_NODES, &params).await?;
                    let relationships = session.run(BACKUP_RELATIONSHIPS, &params).await?;
                    Ok::<_, ExecutionError>((nodes, relationships))
                }
                .await
                .and_then(|(nodes, relationships)| {
                    assemble_backup(&ctx.tenant_id, nodes, relationships)
                });
                settle(session, reads).await
            }
            Err(e) => Err(e),
        };

        let (backup, duration_ms) = self.finish(recorder, started, outcome)?;
        tracing::info!(
            tenant_id = %ctx.tenant_id,
            nodes = backup.nodes.len(),
            relationships = backup.relationships.len(),
            duration_ms,
            "Tenant backup complete"
        );
        Ok(backup)
    }
}

fn tenant_params(tenant_id: &TenantId) -> Params {
    let mut params = Params::new();
    params.insert(
        TENANT_PARAM.to_string(),
        Value::String(tenant_id.as_str().to_string()),
    );
    params
}

fn parse_namespace(rows: Vec<Row>) -> Result<TenantNamespace, ExecutionError> {
    let row = rows.into_iter().next().ok_or_else(|| {
        ExecutionError::Query("namespace upsert returned no rows".to_string())
    })?;
    serde_json::from_value(Value::Object(row))
        .map_err(|e| ExecutionError::Query(format!("Failed to decode namespace: {e}")))
}

fn parse_schema(rows: Vec<Row>) -> Result<SchemaDescription, ExecutionError> {
    match rows.into_iter().next() {
        Some(row) => serde_json::from_value(Value::Object(row))
            .map_err(|e| ExecutionError::Query(format!("Failed to decode schema: {e}"))),
        None => Ok(SchemaDescription::default()),
    }
}

fn assemble_backup(
    tenant_id: &TenantId,
    nodes: Vec<Row>,
    relationships: Vec<Row>,
) -> Result<TenantBackup, ExecutionError> {
    let relationships = relationships
        .into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row)).map_err(|e| {
                ExecutionError::Query(format!("Failed to decode relationship: {e}"))
            })
        })
        .collect::<Result<Vec<BackupRelationship>, _>>()?;

    Ok(TenantBackup {
        tenant_id: tenant_id.clone(),
        timestamp: Utc::now(),
        nodes: nodes.into_iter().map(Value::Object).collect(),
        relationships,
    })
}
