//! Configured allow/deny policy applied to every statement before isolation.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use tenantgraph_core::config::IsolationConfig;
use tenantgraph_core::ExecutionError;

#[derive(Debug, Clone, Default)]
pub struct QueryGuard {
    allowed_labels: Option<BTreeSet<String>>,
    denied_patterns: Vec<String>,
}

impl QueryGuard {
    pub fn new(allowed_labels: Option<Vec<String>>, denied_patterns: Vec<String>) -> Self {
        Self {
            allowed_labels: allowed_labels.map(|labels| labels.into_iter().collect()),
            denied_patterns: denied_patterns
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &IsolationConfig) -> Self {
        Self::new(
            config.allowed_labels.clone(),
            config.denied_patterns.clone(),
        )
    }

    /// Refuse queries containing a denied substring or referencing a label
    /// outside the allow-list.
    pub fn check(&self, query: &str) -> Result<(), ExecutionError> {
        let lowered = query.to_lowercase();
        if let Some(pattern) = self.denied_patterns.iter().find(|p| lowered.contains(p.as_str())) {
            return Err(ExecutionError::PolicyViolation(format!(
                "query contains forbidden pattern '{pattern}'"
            )));
        }

        if let Some(allowed) = &self.allowed_labels {
            if let Some(label) = referenced_labels(query)
                .into_iter()
                .find(|label| !allowed.contains(*label))
            {
                return Err(ExecutionError::PolicyViolation(format!(
                    "label '{label}' is not in the allowed label list"
                )));
            }
        }

        Ok(())
    }
}

fn node_pattern_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(\s*[A-Za-z_0-9]*\s*((?::\s*`?[A-Za-z_][A-Za-z0-9_]*`?\s*)+)").unwrap())
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":\s*`?([A-Za-z_][A-Za-z0-9_]*)`?").unwrap())
}

/// Node labels referenced in `(var:Label:Other ...)` patterns.
fn referenced_labels(query: &str) -> Vec<&str> {
    let mut labels = Vec::new();
    for caps in node_pattern_re().captures_iter(query) {
        let Some(chain) = caps.get(1) else { continue };
        for label in label_re().captures_iter(chain.as_str()) {
            if let Some(m) = label.get(1) {
                if !labels.contains(&m.as_str()) {
                    labels.push(m.as_str());
                }
            }
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_guard_allows_everything() {
        assert!(QueryGuard::default().check("MATCH (n) DETACH DELETE n").is_ok());
    }

    #[test]
    fn denied_patterns_are_case_insensitive() {
        let guard = QueryGuard::new(None, vec!["DETACH DELETE".into(), "apoc.".into()]);
        let err = guard.check("match (n) detach delete n").unwrap_err();
        assert!(matches!(err, ExecutionError::PolicyViolation(ref m) if m.contains("detach delete")));
        assert!(guard.check("CALL APOC.meta.graph()").is_err());
        assert!(guard.check("MATCH (n) RETURN n").is_ok());
    }

    #[test]
    fn allow_list_checks_every_label() {
        let guard = QueryGuard::new(Some(vec!["User".into(), "Project".into()]), vec![]);
        assert!(guard.check("MATCH (u:User)-[:OWNS]->(p:Project) RETURN u").is_ok());
        assert!(guard.check("MATCH (u:User:Admin) RETURN u").is_err());
        let err = guard.check("CREATE (s:Secret {v: 1})").unwrap_err();
        assert_eq!(
            err,
            ExecutionError::PolicyViolation("label 'Secret' is not in the allowed label list".into())
        );
    }

    #[test]
    fn relationship_types_are_not_labels() {
        assert_eq!(
            referenced_labels("MATCH (a:User)-[r:KNOWS]->(b :`Team`) RETURN a"),
            vec!["User", "Team"]
        );
    }
}
