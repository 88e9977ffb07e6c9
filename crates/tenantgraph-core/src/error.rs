use thiserror::Error;

/// Failure of a single graph operation.
///
/// Every variant carries a human-readable message; the executor records it
/// in the audit trail before propagating the error unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The database is unreachable or rejected our credentials.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Malformed query, constraint violation, or type mismatch at the database.
    #[error("Query error: {0}")]
    Query(String),

    /// The per-call ceiling or a database-side timeout was exceeded.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Caller-supplied arguments were rejected before reaching the database.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The query was refused by the configured allow/deny lists.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ExecutionError {
    /// Stable snake_case tag for logs and protocol envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "connectivity",
            Self::Query(_) => "query",
            Self::Timeout(_) => "timeout",
            Self::Validation(_) => "validation",
            Self::PolicyViolation(_) => "policy_violation",
            Self::Serialization(_) => "serialization",
        }
    }

    /// The message recorded in audit records. Never empty.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
