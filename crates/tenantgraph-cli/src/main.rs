//! CLI entry point: one subcommand per tenant graph operation, JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::{fmt, EnvFilter};

use tenantgraph_audit::{AuditSink, FanoutAuditSink, JsonlAuditSink, TracingAuditSink};
use tenantgraph_core::{
    ExecutionContext, ExecutionError, NodeRef, Operation, Params, TenantGraphConfig, TenantId,
};
use tenantgraph_graph::{GraphClient, QueryExecutor};

#[derive(Parser)]
#[command(name = "tenantgraph")]
#[command(about = "Tenant-isolated, audited operations on a Neo4j graph")]
struct Cli {
    /// Tenant the operation is scoped to.
    #[arg(short, long)]
    tenant_id: String,

    /// Acting user, recorded in the audit trail.
    #[arg(long)]
    user_id: Option<String>,

    /// Caller session, recorded in the audit trail.
    #[arg(long)]
    session_id: Option<String>,

    /// Config file prefix (default: tenantgraph).
    #[arg(short, long, default_value = "tenantgraph")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the tenant namespace, or touch it if it exists.
    Namespace,

    /// Create a node stamped with the tenant.
    CreateNode {
        #[arg(short, long)]
        label: String,

        /// Properties as a JSON object.
        #[arg(short, long, default_value = "{}")]
        properties: String,
    },

    /// Create a relationship between two of the tenant's nodes.
    CreateRelationship {
        #[arg(long)]
        from_label: String,
        #[arg(long)]
        from_key: String,
        /// JSON value; bare text is taken as a string.
        #[arg(long)]
        from_value: String,
        #[arg(long)]
        to_label: String,
        #[arg(long)]
        to_key: String,
        #[arg(long)]
        to_value: String,
        #[arg(short = 'r', long = "type")]
        relationship_type: String,
        #[arg(short, long, default_value = "{}")]
        properties: String,
    },

    /// Run a free-form Cypher query.
    Query {
        cypher: String,

        /// Parameters as a JSON object.
        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// Print the (global, unscoped) database schema.
    Schema,

    /// Export all of the tenant's nodes and relationships.
    Backup {
        /// Write the backup document here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = TenantGraphConfig::load(&cli.config)?;

    let ctx = build_context(&cli)?;
    let operation = build_operation(&cli.command)?;

    let client = GraphClient::connect(&config.neo4j).await?;
    let executor = QueryExecutor::from_config(
        Arc::new(client.clone()),
        build_audit_sink(&config)?,
        &config,
    );

    tracing::info!(
        operation = operation.name(),
        tenant_id = %ctx.tenant_id,
        request_id = %ctx.request_id,
        "Running operation"
    );
    let outcome = run(&executor, &operation, &cli.command, &ctx).await;
    client.shutdown();

    match outcome {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            let envelope = json!({ "error": { "kind": e.kind(), "message": e.message() } });
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            std::process::exit(1);
        }
    }
}

async fn run(
    executor: &QueryExecutor,
    operation: &Operation,
    command: &Command,
    ctx: &ExecutionContext,
) -> Result<Value, ExecutionError> {
    match operation {
        Operation::EnsureNamespace => {
            executor.ensure_namespace_constraint(ctx).await?;
            Ok(serde_json::to_value(executor.ensure_namespace(ctx).await?)?)
        }
        Operation::GetSchema => Ok(serde_json::to_value(executor.get_schema(ctx).await?)?),
        Operation::Backup => {
            let backup = executor.backup_tenant(ctx).await?;
            match command {
                Command::Backup { out: Some(path) } => {
                    std::fs::write(path, backup.to_json_pretty()?)
                        .map_err(|e| ExecutionError::Serialization(e.to_string()))?;
                    Ok(json!({
                        "tenantId": backup.tenant_id,
                        "path": path.display().to_string(),
                        "nodes": backup.nodes.len(),
                        "relationships": backup.relationships.len(),
                    }))
                }
                _ => Ok(serde_json::to_value(backup)?),
            }
        }
        op => Ok(serde_json::to_value(executor.execute_operation(op, ctx).await?)?),
    }
}

fn build_context(cli: &Cli) -> anyhow::Result<ExecutionContext> {
    let mut ctx = ExecutionContext::new(TenantId::parse(&cli.tenant_id)?);
    if let Some(user) = &cli.user_id {
        ctx = ctx.with_user(user.clone());
    }
    if let Some(session) = &cli.session_id {
        ctx = ctx.with_session(session.clone());
    }
    Ok(ctx)
}

fn build_operation(command: &Command) -> anyhow::Result<Operation> {
    let op = match command {
        Command::Namespace => Operation::EnsureNamespace,
        Command::CreateNode { label, properties } => Operation::CreateNode {
            label: label.clone(),
            properties: serde_json::from_str(properties)?,
        },
        Command::CreateRelationship {
            from_label,
            from_key,
            from_value,
            to_label,
            to_key,
            to_value,
            relationship_type,
            properties,
        } => Operation::CreateRelationship {
            from: NodeRef {
                label: from_label.clone(),
                key: from_key.clone(),
                value: parse_value(from_value),
            },
            to: NodeRef {
                label: to_label.clone(),
                key: to_key.clone(),
                value: parse_value(to_value),
            },
            relationship_type: relationship_type.clone(),
            properties: serde_json::from_str(properties)?,
        },
        Command::Query { cypher, params } => Operation::RunQuery {
            query: cypher.clone(),
            parameters: serde_json::from_str::<Params>(params)?,
        },
        Command::Schema => Operation::GetSchema,
        Command::Backup { .. } => Operation::Backup,
    };
    Ok(op)
}

fn build_audit_sink(config: &TenantGraphConfig) -> anyhow::Result<Arc<dyn AuditSink>> {
    let mut sink = FanoutAuditSink::new().with(Arc::new(TracingAuditSink));
    if let Some(path) = &config.audit.log_path {
        sink = sink.with(Arc::new(JsonlAuditSink::new(path)?));
    }
    Ok(Arc::new(sink))
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("\"Ann\""), json!("Ann"));
        assert_eq!(parse_value("Ann"), json!("Ann"));
    }

    #[test]
    fn test_create_node_command() {
        let cli = Cli::try_parse_from([
            "tenantgraph",
            "--tenant-id",
            "proj-A",
            "create-node",
            "--label",
            "User",
            "--properties",
            r#"{"name":"Ann"}"#,
        ])
        .unwrap();
        let op = build_operation(&cli.command).unwrap();
        assert_eq!(
            op,
            Operation::CreateNode {
                label: "User".into(),
                properties: json!({"name": "Ann"}),
            }
        );
    }

    #[test]
    fn test_query_params_must_be_an_object() {
        let cli = Cli::try_parse_from([
            "tenantgraph",
            "-t",
            "proj-A",
            "query",
            "MATCH (n) RETURN n",
            "--params",
            "[1]",
        ])
        .unwrap();
        assert!(build_operation(&cli.command).is_err());
    }

    #[test]
    fn test_blank_tenant_rejected() {
        let cli = Cli::try_parse_from(["tenantgraph", "--tenant-id", " ", "schema"]).unwrap();
        assert!(build_context(&cli).is_err());
    }
}
