//! Neo4j connection management and the driver-backed session factory.

use std::time::Duration;

use async_trait::async_trait;
use neo4rs::{BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Txn};
use serde_json::Value;
use uuid::Uuid;

use tenantgraph_core::config::Neo4jConfig;
use tenantgraph_core::{ExecutionError, Params, Row};

use crate::session::{GraphSession, SessionFactory};

/// Thread-safe Neo4j graph client with connection pooling.
///
/// This is the single owned handle on the driver; it is injected into the
/// executor and torn down with [`GraphClient::shutdown`].
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
    query_timeout: Duration,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration and verify the link.
    pub async fn connect(config: &Neo4jConfig) -> Result<Self, ExecutionError> {
        let mut builder = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size);
        if let Some(db) = &config.database {
            builder = builder.db(db.as_str());
        }
        let neo_config = builder
            .build()
            .map_err(|e| ExecutionError::Connectivity(e.to_string()))?;

        let connect_timeout = Duration::from_secs(config.connection_timeout_secs);
        let graph = tokio::time::timeout(connect_timeout, async {
            let graph = Graph::connect(neo_config).await?;
            graph.run(neo4rs::query("RETURN 1")).await?;
            Ok::<_, neo4rs::Error>(graph)
        })
        .await
        .map_err(|_| {
            ExecutionError::Timeout(format!(
                "no connection to {} within {}s",
                config.uri, config.connection_timeout_secs
            ))
        })?
        .map_err(classify_driver_error)?;

        tracing::info!(
            uri = %config.uri,
            max_connections = config.max_connections,
            max_transaction_retry_secs = config.max_transaction_retry_secs,
            "Connected to Neo4j"
        );
        Ok(Self {
            graph,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        })
    }

    /// Release the connection pool.
    pub fn shutdown(self) {
        tracing::info!("Closing Neo4j connection pool");
        drop(self.graph);
    }
}

#[async_trait]
impl SessionFactory for GraphClient {
    async fn open(&self) -> Result<Box<dyn GraphSession>, ExecutionError> {
        let txn = self.graph.start_txn().await.map_err(classify_driver_error)?;
        let id = Uuid::new_v4();
        tracing::trace!(session = %id, "Session opened");
        Ok(Box::new(Neo4jSession {
            id,
            txn,
            query_timeout: self.query_timeout,
        }))
    }
}

/// A session holding one pooled connection for its whole life, with every
/// query running inside a single explicit transaction.
struct Neo4jSession {
    id: Uuid,
    txn: Txn,
    query_timeout: Duration,
}

#[async_trait]
impl GraphSession for Neo4jSession {
    async fn run(&mut self, query: &str, params: &Params) -> Result<Vec<Row>, ExecutionError> {
        let mut q = neo4rs::query(query);
        for (key, value) in params {
            q = q.param(key, json_to_bolt(value));
        }

        let limit = self.query_timeout;
        let rows = tokio::time::timeout(limit, collect_rows(&mut self.txn, q))
            .await
            .map_err(|_| ExecutionError::Timeout(format!("query exceeded {}ms", limit.as_millis())))?
            .map_err(classify_driver_error)?;

        rows.iter()
            .map(|row| {
                row.to::<Row>()
                    .map_err(|e| ExecutionError::Query(format!("Failed to decode row: {e}")))
            })
            .collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), ExecutionError> {
        let Neo4jSession { id, txn, .. } = *self;
        txn.commit().await.map_err(classify_driver_error)?;
        tracing::trace!(session = %id, "Session committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        let Neo4jSession { id, txn, .. } = *self;
        match txn.rollback().await {
            Ok(()) => tracing::trace!(session = %id, "Session rolled back"),
            Err(e) => tracing::warn!(session = %id, error = %e, "Rollback failed"),
        }
    }
}

async fn collect_rows(txn: &mut Txn, query: Query) -> Result<Vec<neo4rs::Row>, neo4rs::Error> {
    let mut stream = txn.execute(query).await?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next(txn.handle()).await? {
        rows.push(row);
    }
    Ok(rows)
}

/// Map a driver error onto the execution error taxonomy.
fn classify_driver_error(e: neo4rs::Error) -> ExecutionError {
    let message = e.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("timeout") || lowered.contains("timed out") {
        ExecutionError::Timeout(message)
    } else if [
        "authentication",
        "unauthorized",
        "connection",
        "io error",
        "refused",
        "broken pipe",
        "unreachable",
    ]
    .iter()
    .any(|k| lowered.contains(k))
    {
        ExecutionError::Connectivity(message)
    } else {
        ExecutionError::Query(message)
    }
}

/// Convert a JSON parameter into a Bolt value.
fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.clone()),
        Value::Array(items) => BoltType::from(items.iter().map(json_to_bolt).collect::<Vec<_>>()),
        Value::Object(map) => BoltType::Map(BoltMap {
            value: map
                .iter()
                .map(|(k, v)| (BoltString::from(k.as_str()), json_to_bolt(v)))
                .collect(),
        }),
    }
}
