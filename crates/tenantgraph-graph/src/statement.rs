//! Rendering of structured operations into parameterized Cypher.
//!
//! Labels and relationship types cannot be bound as parameters, so they are
//! validated as plain identifiers before being spliced into the template.
//! Every template references `$tenantId` and stamps the tenant on what it
//! creates.

use chrono::Utc;
use serde_json::Value;

use tenantgraph_core::{ActionKind, ExecutionError, NodeRef, Operation, Params};

use crate::classify::classify;

/// A finalized statement ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub parameters: Params,
    pub action: ActionKind,
    /// Built from a fixed template that already references `$tenantId`.
    pub templated: bool,
}

impl Statement {
    /// A caller-supplied query, classified by keyword heuristic.
    pub fn free_form(text: impl Into<String>, parameters: Params) -> Self {
        let text = text.into();
        let action = classify(&text);
        Self {
            text,
            parameters,
            action,
            templated: false,
        }
    }

    fn template(text: String, parameters: Params, action: ActionKind) -> Self {
        Self {
            text,
            parameters,
            action,
            templated: true,
        }
    }

    /// Render the operations that execute through the executor.
    ///
    /// Namespace, schema and backup operations carry their own fixed queries
    /// and are rejected here.
    pub fn from_operation(op: &Operation) -> Result<Self, ExecutionError> {
        match op {
            Operation::CreateNode { label, properties } => create_node(label, properties),
            Operation::CreateRelationship {
                from,
                to,
                relationship_type,
                properties,
            } => create_relationship(from, to, relationship_type, properties),
            Operation::RunQuery { query, parameters } => {
                if query.trim().is_empty() {
                    return Err(ExecutionError::Validation(
                        "query must not be empty".to_string(),
                    ));
                }
                Ok(Self::free_form(query.clone(), parameters.clone()))
            }
            other => Err(ExecutionError::Validation(format!(
                "operation '{}' is not rendered as a statement",
                other.name()
            ))),
        }
    }
}

fn create_node(label: &str, properties: &Value) -> Result<Statement, ExecutionError> {
    validate_identifier("label", label)?;
    let props = validate_properties(properties)?;

    let cypher = format!(
        "CREATE (n:{label})
         SET n = $props, n.tenantId = $tenantId, n.createdAt = $now
         RETURN n"
    );

    let mut params = Params::new();
    params.insert("props".to_string(), Value::Object(props));
    params.insert("now".to_string(), Value::String(Utc::now().to_rfc3339()));

    Ok(Statement::template(cypher, params, ActionKind::Create))
}

fn create_relationship(
    from: &NodeRef,
    to: &NodeRef,
    relationship_type: &str,
    properties: &Value,
) -> Result<Statement, ExecutionError> {
    validate_node_ref("from", from)?;
    validate_node_ref("to", to)?;
    validate_identifier("relationship type", relationship_type)?;
    let props = validate_properties(properties)?;

    let from_label = &from.label;
    let to_label = &to.label;
    let cypher = format!(
        "MATCH (a:{from_label} {{tenantId: $tenantId}}) WHERE a[$fromKey] = $fromValue
         MATCH (b:{to_label} {{tenantId: $tenantId}}) WHERE b[$toKey] = $toValue
         CREATE (a)-[r:{relationship_type}]->(b)
         SET r = $props, r.tenantId = $tenantId, r.createdAt = $now
         RETURN a, r, b"
    );

    let mut params = Params::new();
    params.insert("fromKey".to_string(), Value::String(from.key.clone()));
    params.insert("fromValue".to_string(), from.value.clone());
    params.insert("toKey".to_string(), Value::String(to.key.clone()));
    params.insert("toValue".to_string(), to.value.clone());
    params.insert("props".to_string(), Value::Object(props));
    params.insert("now".to_string(), Value::String(Utc::now().to_rfc3339()));

    Ok(Statement::template(cypher, params, ActionKind::Create))
}

fn validate_node_ref(side: &str, node: &NodeRef) -> Result<(), ExecutionError> {
    validate_identifier(&format!("{side} label"), &node.label)?;
    if node.key.trim().is_empty() {
        return Err(ExecutionError::Validation(format!(
            "{side} key must not be empty"
        )));
    }
    if !is_property_value(&node.value) || node.value.is_null() {
        return Err(ExecutionError::Validation(format!(
            "{side} value must be a string, number, boolean or list of those"
        )));
    }
    Ok(())
}

/// A Cypher identifier that is safe to splice unquoted.
fn validate_identifier(what: &str, ident: &str) -> Result<(), ExecutionError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ExecutionError::Validation(format!(
            "{what} '{ident}' must be an identifier of letters, digits and underscores"
        )))
    }
}

/// Properties must be a flat object; null means no properties.
fn validate_properties(properties: &Value) -> Result<Params, ExecutionError> {
    let map = match properties {
        Value::Null => return Ok(Params::new()),
        Value::Object(map) => map,
        _ => {
            return Err(ExecutionError::Validation(
                "properties must be a JSON object".to_string(),
            ))
        }
    };
    if let Some((key, _)) = map.iter().find(|(_, v)| !is_property_value(v)) {
        return Err(ExecutionError::Validation(format!(
            "property '{key}' must be a string, number, boolean or list of those"
        )));
    }
    Ok(map.clone())
}

fn is_property_value(value: &Value) -> bool {
    match value {
        Value::Object(_) => false,
        Value::Array(items) => items
            .iter()
            .all(|v| !matches!(v, Value::Object(_) | Value::Array(_))),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_node_template() {
        let op = Operation::CreateNode {
            label: "User".into(),
            properties: json!({"name": "Ann", "tags": ["a", "b"]}),
        };
        let stmt = Statement::from_operation(&op).unwrap();
        assert!(stmt.templated);
        assert_eq!(stmt.action, ActionKind::Create);
        assert!(stmt.text.starts_with("CREATE (n:User)"));
        assert!(stmt.text.contains("n.tenantId = $tenantId"));
        assert_eq!(stmt.parameters["props"]["name"], "Ann");
        assert!(stmt.parameters.contains_key("now"));
    }

    #[test]
    fn create_node_rejects_injection_in_label() {
        let op = Operation::CreateNode {
            label: "User) DETACH DELETE (x".into(),
            properties: Value::Null,
        };
        assert!(matches!(
            Statement::from_operation(&op),
            Err(ExecutionError::Validation(_))
        ));
    }

    #[test]
    fn properties_must_be_flat() {
        for bad in [json!([1, 2]), json!("x"), json!({"nested": {"a": 1}}), json!({"m": [[1]]})] {
            let op = Operation::CreateNode {
                label: "User".into(),
                properties: bad,
            };
            assert!(Statement::from_operation(&op).is_err());
        }
    }

    #[test]
    fn create_relationship_template() {
        let op = Operation::CreateRelationship {
            from: NodeRef {
                label: "User".into(),
                key: "name".into(),
                value: json!("Ann"),
            },
            to: NodeRef {
                label: "Project".into(),
                key: "code".into(),
                value: json!(7),
            },
            relationship_type: "WORKS_ON".into(),
            properties: json!({"since": 2024}),
        };
        let stmt = Statement::from_operation(&op).unwrap();
        assert!(stmt.text.contains("MATCH (a:User {tenantId: $tenantId})"));
        assert!(stmt.text.contains("MATCH (b:Project {tenantId: $tenantId})"));
        assert!(stmt.text.contains("CREATE (a)-[r:WORKS_ON]->(b)"));
        assert_eq!(stmt.parameters["fromValue"], "Ann");
        assert_eq!(stmt.parameters["toValue"], 7);
        assert_eq!(stmt.parameters["props"]["since"], 2024);
    }

    #[test]
    fn create_relationship_requires_endpoint_values() {
        let op = Operation::CreateRelationship {
            from: NodeRef {
                label: "User".into(),
                key: "name".into(),
                value: Value::Null,
            },
            to: NodeRef {
                label: "User".into(),
                key: "name".into(),
                value: json!("Bob"),
            },
            relationship_type: "KNOWS".into(),
            properties: Value::Null,
        };
        assert!(Statement::from_operation(&op).is_err());
    }

    #[test]
    fn run_query_is_free_form_and_classified() {
        let op = Operation::RunQuery {
            query: "MATCH (n) DELETE n".into(),
            parameters: Params::new(),
        };
        let stmt = Statement::from_operation(&op).unwrap();
        assert!(!stmt.templated);
        assert_eq!(stmt.action, ActionKind::Delete);

        let empty = Operation::RunQuery {
            query: "  ".into(),
            parameters: Params::new(),
        };
        assert!(Statement::from_operation(&empty).is_err());
    }

    #[test]
    fn auxiliary_operations_are_not_statements() {
        assert!(Statement::from_operation(&Operation::Backup).is_err());
        assert!(Statement::from_operation(&Operation::GetSchema).is_err());
    }
}
