//! Configuration management for TenantGraph.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`TENANTGRAPH__` prefix, `__` separator)
//! 2. Config file (`tenantgraph.toml` by default)
//! 3. Defaults

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantGraphConfig {
    #[serde(default)]
    pub neo4j: Neo4jConfig,

    #[serde(default)]
    pub isolation: IsolationConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

/// Connection settings for the Neo4j driver.
#[derive(Debug, Clone, Deserialize)]
pub struct Neo4jConfig {
    #[serde(default = "default_uri")]
    pub uri: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Target database; the server default when unset.
    #[serde(default)]
    pub database: Option<String>,

    /// Connection pool ceiling.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Retry budget handed to the driver layer. The executor never retries.
    #[serde(default = "default_retry_secs")]
    pub max_transaction_retry_secs: u64,

    /// Per-call ceiling on query execution.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

/// Tenant isolation and query policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IsolationConfig {
    /// Attempt best-effort rewriting of free-form queries.
    #[serde(default)]
    pub enforce: bool,

    /// When set, only these node labels may appear in a query.
    #[serde(default)]
    pub allowed_labels: Option<Vec<String>>,

    /// Case-insensitive substrings that cause a query to be refused.
    #[serde(default)]
    pub denied_patterns: Vec<String>,
}

/// What the audit trail records and where it goes.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub include_query: bool,

    #[serde(default)]
    pub include_parameters: bool,

    /// Append-only JSON-lines file, in addition to the tracing sink.
    #[serde(default)]
    pub log_path: Option<String>,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_retry_secs() -> u64 {
    30
}

fn default_query_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: String::new(),
            database: None,
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
            connection_timeout_secs: default_connection_timeout(),
            max_transaction_retry_secs: default_retry_secs(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            include_query: true,
            include_parameters: false,
            log_path: None,
        }
    }
}

impl TenantGraphConfig {
    /// Load from `<file_prefix>.toml` (optional) overlaid with `TENANTGRAPH__*` env vars.
    ///
    /// List options take comma-separated values from the environment, e.g.
    /// `TENANTGRAPH__ISOLATION__DENIED_PATTERNS=apoc.,dbms.`.
    pub fn load(file_prefix: &str) -> Result<Self, ConfigError> {
        Self::load_with_env(file_prefix, None)
    }

    /// As [`load`](Self::load), reading variables from `env` instead of the
    /// process environment when given.
    fn load_with_env(
        file_prefix: &str,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("TENANTGRAPH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("isolation.allowed_labels")
                    .with_list_parse_key("isolation.denied_patterns")
                    .source(env),
            )
            .build()?;

        let loaded: Self = cfg.try_deserialize()?;
        loaded.validate()?;
        tracing::debug!(
            file_prefix,
            uri = %loaded.neo4j.uri,
            enforce_isolation = loaded.isolation.enforce,
            "Configuration loaded"
        );
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.neo4j.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "neo4j.max_connections must be at least 1".to_string(),
            ));
        }
        if self.neo4j.query_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "neo4j.query_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.isolation.denied_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "isolation.denied_patterns must not contain blank entries".to_string(),
            ));
        }
        Ok(())
    }
}
