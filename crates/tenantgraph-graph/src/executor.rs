//! Tenant-scoped, audited query execution.
//!
//! One call runs: acquire session, policy check, isolation, submit, release.
//! Exactly one audit record is emitted per call, whatever the outcome, and
//! failures are propagated unchanged after the record is emitted. Nothing
//! here retries.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use tenantgraph_audit::{AuditId, AuditRecorder, AuditSink};
use tenantgraph_core::config::AuditConfig;
use tenantgraph_core::{
    ActionKind, ExecutionContext, ExecutionError, Operation, Params, Row, TenantGraphConfig,
};

use crate::guard::QueryGuard;
use crate::isolation::IsolationFilter;
use crate::session::{settle, GraphSession, SessionFactory};
use crate::statement::Statement;

/// Rows returned by one execution plus its audit metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub action: ActionKind,
    pub duration_ms: u64,
    pub request_id: Uuid,
    pub audit_id: AuditId,
}

pub struct QueryExecutor {
    pub(crate) sessions: Arc<dyn SessionFactory>,
    audit: Arc<dyn AuditSink>,
    isolation: IsolationFilter,
    guard: QueryGuard,
    audit_config: AuditConfig,
}

impl QueryExecutor {
    /// Baseline executor: parameter-binding isolation, no allow/deny lists.
    pub fn new(sessions: Arc<dyn SessionFactory>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            sessions,
            audit,
            isolation: IsolationFilter::default(),
            guard: QueryGuard::default(),
            audit_config: AuditConfig::default(),
        }
    }

    pub fn from_config(
        sessions: Arc<dyn SessionFactory>,
        audit: Arc<dyn AuditSink>,
        config: &TenantGraphConfig,
    ) -> Self {
        Self::new(sessions, audit)
            .with_isolation(IsolationFilter::new(config.isolation.enforce))
            .with_guard(QueryGuard::from_config(&config.isolation))
            .with_audit_config(config.audit.clone())
    }

    pub fn with_isolation(mut self, isolation: IsolationFilter) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_guard(mut self, guard: QueryGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_audit_config(mut self, audit_config: AuditConfig) -> Self {
        self.audit_config = audit_config;
        self
    }

    /// Run a free-form query, classified by keyword heuristic.
    pub async fn execute(
        &self,
        query: &str,
        params: Params,
        ctx: &ExecutionContext,
    ) -> Result<QueryResult, ExecutionError> {
        self.execute_statement(Statement::free_form(query, params), ctx)
            .await
    }

    /// Run a tagged operation. Invalid arguments are rejected before a
    /// session is acquired and produce no audit record.
    pub async fn execute_operation(
        &self,
        op: &Operation,
        ctx: &ExecutionContext,
    ) -> Result<QueryResult, ExecutionError> {
        let statement = Statement::from_operation(op)?;
        self.execute_statement(statement, ctx).await
    }

    pub async fn execute_statement(
        &self,
        statement: Statement,
        ctx: &ExecutionContext,
    ) -> Result<QueryResult, ExecutionError> {
        tracing::debug!(
            request_id = %ctx.request_id,
            tenant_id = %ctx.tenant_id,
            action = %statement.action,
            "Executing statement"
        );

        let recorder = self.recorder(ctx, statement.action, &statement.text, &statement.parameters);
        let audit_id = recorder.id();
        let started = Instant::now();

        let outcome = match self.sessions.open().await {
            Ok(mut session) => {
                let outcome = self.run_scoped(session.as_mut(), &statement, ctx).await;
                settle(session, outcome).await
            }
            Err(e) => Err(e),
        };

        let (rows, duration_ms) = self.finish(recorder, started, outcome)?;
        Ok(QueryResult {
            row_count: rows.len(),
            rows,
            action: statement.action,
            duration_ms,
            request_id: ctx.request_id,
            audit_id,
        })
    }

    async fn run_scoped(
        &self,
        session: &mut dyn GraphSession,
        statement: &Statement,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Row>, ExecutionError> {
        if let Err(e) = self.guard.check(&statement.text) {
            tracing::warn!(tenant_id = %ctx.tenant_id, error = %e, "Query refused by policy");
            return Err(e);
        }
        let scoped = self
            .isolation
            .scope(&statement.text, &ctx.tenant_id, statement.templated);
        let (text, params) = scoped.bind(statement.parameters.clone());
        session.run(&text, &params).await
    }

    /// Start an audit record, honouring what the config says to persist.
    pub(crate) fn recorder(
        &self,
        ctx: &ExecutionContext,
        action: ActionKind,
        query: &str,
        params: &Params,
    ) -> AuditRecorder {
        let mut recorder = AuditRecorder::new(ctx, action);
        if self.audit_config.include_query {
            recorder = recorder.query(query);
        }
        if self.audit_config.include_parameters {
            recorder = recorder.parameters(params.clone());
        }
        recorder
    }

    /// Emit the audit record for `outcome`, then hand the outcome back.
    pub(crate) fn finish<T>(
        &self,
        recorder: AuditRecorder,
        started: Instant,
        outcome: Result<T, ExecutionError>,
    ) -> Result<(T, u64), ExecutionError> {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(value) => {
                self.audit.emit(&recorder.succeeded(duration_ms));
                Ok((value, duration_ms))
            }
            Err(e) => {
                self.audit.emit(&recorder.failed(duration_ms, &e.message()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSessions;
    use serde_json::json;
    use tenantgraph_audit::MemoryAuditSink;
    use tenantgraph_core::TenantId;

    fn ctx(tenant: &str) -> ExecutionContext {
        ExecutionContext::new(TenantId::parse(tenant).unwrap()).with_user("ann")
    }

    fn row(key: &str, value: serde_json::Value) -> Row {
        let mut row = Row::new();
        row.insert(key.to_string(), value);
        row
    }

    fn executor(sessions: &Arc<ScriptedSessions>, audit: &Arc<MemoryAuditSink>) -> QueryExecutor {
        QueryExecutor::new(sessions.clone(), audit.clone())
    }

    #[tokio::test]
    async fn success_emits_one_successful_record() {
        let sessions = Arc::new(ScriptedSessions::new(vec![Ok(vec![
            row("u.name", json!("Ann")),
            row("u.name", json!("Bob")),
        ])]));
        let audit = Arc::new(MemoryAuditSink::new());
        let ctx = ctx("proj-A");

        let result = executor(&sessions, &audit)
            .execute("MATCH (u:User) RETURN u.name", Params::new(), &ctx)
            .await
            .unwrap();

        assert_eq!(result.row_count, 2);
        assert_eq!(result.action, ActionKind::Read);
        assert_eq!(result.request_id, ctx.request_id);

        let records = audit.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.success);
        assert!(record.error.is_none());
        assert_eq!(record.tenant_id, ctx.tenant_id);
        assert_eq!(record.user_id.as_deref(), Some("ann"));
        assert_eq!(record.id, result.audit_id);
        assert_eq!(record.query.as_deref(), Some("MATCH (u:User) RETURN u.name"));
        assert!(record.parameters.is_none());
        assert!(record.verify_integrity());
    }

    #[tokio::test]
    async fn failure_is_audited_then_propagated() {
        let sessions = Arc::new(ScriptedSessions::new(vec![Err(ExecutionError::Query(
            "Invalid input 'MATC'".into(),
        ))]));
        let audit = Arc::new(MemoryAuditSink::new());

        let err = executor(&sessions, &audit)
            .execute("MATC (n) RETURN n", Params::new(), &ctx("proj-A"))
            .await
            .unwrap_err();

        assert_eq!(err, ExecutionError::Query("Invalid input 'MATC'".into()));
        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].error.as_deref(), Some("Query error: Invalid input 'MATC'"));
    }

    #[tokio::test]
    async fn session_released_once_when_submission_fails() {
        let sessions = Arc::new(ScriptedSessions::new(vec![Err(ExecutionError::Connectivity(
            "connection reset".into(),
        ))]));
        let audit = Arc::new(MemoryAuditSink::new());

        let result = executor(&sessions, &audit)
            .execute("MATCH (n) RETURN n", Params::new(), &ctx("t1"))
            .await;

        assert!(matches!(result, Err(ExecutionError::Connectivity(_))));
        assert_eq!(sessions.opened(), 1);
        assert_eq!(sessions.rolled_back(), 1);
        assert_eq!(sessions.committed(), 0);
    }

    #[tokio::test]
    async fn session_released_on_success() {
        let sessions = Arc::new(ScriptedSessions::new(vec![Ok(vec![])]));
        let audit = Arc::new(MemoryAuditSink::new());
        executor(&sessions, &audit)
            .execute("RETURN 1", Params::new(), &ctx("t1"))
            .await
            .unwrap();
        assert_eq!(sessions.committed(), 1);
        assert_eq!(sessions.rolled_back(), 0);
    }

    #[tokio::test]
    async fn commit_failure_fails_the_call_and_is_audited() {
        let sessions = Arc::new(ScriptedSessions::failing_commit(
            vec![Ok(vec![])],
            ExecutionError::Connectivity("connection reset during commit".into()),
        ));
        let audit = Arc::new(MemoryAuditSink::new());

        let result = executor(&sessions, &audit)
            .execute("CREATE (n:User) RETURN n", Params::new(), &ctx("t1"))
            .await;

        assert!(matches!(result, Err(ExecutionError::Connectivity(_))));
        assert_eq!(sessions.committed(), 1);
        assert_eq!(audit.len(), 1);
        assert!(!audit.records()[0].success);
    }

    #[tokio::test]
    async fn acquisition_failure_is_audited() {
        let sessions = Arc::new(ScriptedSessions::failing_open(ExecutionError::Connectivity(
            "authentication failure".into(),
        )));
        let audit = Arc::new(MemoryAuditSink::new());

        let result = executor(&sessions, &audit)
            .execute("RETURN 1", Params::new(), &ctx("t1"))
            .await;

        assert!(matches!(result, Err(ExecutionError::Connectivity(_))));
        assert_eq!(audit.len(), 1);
        assert!(!audit.records()[0].success);
        assert_eq!(sessions.closed(), 0);
    }

    #[tokio::test]
    async fn tenant_parameter_overwrites_caller_value() {
        let sessions = Arc::new(ScriptedSessions::new(vec![Ok(vec![])]));
        let audit = Arc::new(MemoryAuditSink::new());
        let mut params = Params::new();
        params.insert("tenantId".into(), json!("proj-B"));
        params.insert("name".into(), json!("Ann"));

        executor(&sessions, &audit)
            .execute(
                "MATCH (u:User {tenantId: $tenantId, name: $name}) RETURN u",
                params,
                &ctx("proj-A"),
            )
            .await
            .unwrap();

        let (_, bound) = &sessions.submitted()[0];
        assert_eq!(bound["tenantId"], "proj-A");
        assert_eq!(bound["name"], "Ann");
    }

    #[tokio::test]
    async fn enforcement_rewrites_free_form_queries() {
        let sessions = Arc::new(ScriptedSessions::new(vec![Ok(vec![])]));
        let audit = Arc::new(MemoryAuditSink::new());

        executor(&sessions, &audit)
            .with_isolation(IsolationFilter::new(true))
            .execute("MATCH (u:User) RETURN u.name", Params::new(), &ctx("proj-A"))
            .await
            .unwrap();

        let (text, _) = &sessions.submitted()[0];
        assert_eq!(text, "MATCH (u:User) WHERE u.tenantId = $tenantId RETURN u.name");
        // The audit trail keeps the caller's text.
        assert_eq!(
            audit.records()[0].query.as_deref(),
            Some("MATCH (u:User) RETURN u.name")
        );
    }

    #[tokio::test]
    async fn policy_rejection_is_audited_and_never_submitted() {
        let sessions = Arc::new(ScriptedSessions::new(vec![]));
        let audit = Arc::new(MemoryAuditSink::new());

        let err = executor(&sessions, &audit)
            .with_guard(QueryGuard::new(None, vec!["detach delete".into()]))
            .execute("MATCH (n) DETACH DELETE n", Params::new(), &ctx("t1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::PolicyViolation(_)));
        assert!(sessions.submitted().is_empty());
        assert_eq!(sessions.closed(), 1);
        let record = &audit.records()[0];
        assert_eq!(record.action, ActionKind::Delete);
        assert!(!record.success);
    }

    #[tokio::test]
    async fn invalid_operation_never_acquires_a_session() {
        let sessions = Arc::new(ScriptedSessions::new(vec![]));
        let audit = Arc::new(MemoryAuditSink::new());
        let op = Operation::CreateNode {
            label: "Bad Label".into(),
            properties: json!({}),
        };

        let err = executor(&sessions, &audit)
            .execute_operation(&op, &ctx("t1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Validation(_)));
        assert_eq!(sessions.opened(), 0);
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn create_node_operation_is_audited_as_create() {
        let sessions = Arc::new(ScriptedSessions::new(vec![Ok(vec![row("n", json!({"name": "Ann"}))])]));
        let audit = Arc::new(MemoryAuditSink::new());
        let op = Operation::CreateNode {
            label: "User".into(),
            properties: json!({"name": "Ann"}),
        };

        let result = executor(&sessions, &audit)
            .with_audit_config(AuditConfig {
                include_query: false,
                include_parameters: true,
                log_path: None,
            })
            .execute_operation(&op, &ctx("proj-A"))
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Create);
        let (_, bound) = &sessions.submitted()[0];
        assert_eq!(bound["tenantId"], "proj-A");
        let record = &audit.records()[0];
        assert!(record.query.is_none());
        assert_eq!(record.parameters.as_ref().unwrap()["props"]["name"], "Ann");
    }
}
