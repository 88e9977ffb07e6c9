//! Keyword heuristic that labels free-form queries for the audit trail.
//!
//! This is not a parser. Checks run in a fixed priority order over a
//! case-insensitive substring search, so compound statements resolve to the
//! first matching class: `MATCH (n) DETACH DELETE n` is a DELETE.

use tenantgraph_core::ActionKind;

const RULES: &[(&[&str], ActionKind)] = &[
    (&["create", "merge"], ActionKind::Create),
    (&["delete", "detach"], ActionKind::Delete),
    (&["set", "remove"], ActionKind::Update),
    (&["match", "return"], ActionKind::Read),
];

/// Classify a raw query string. First match wins; otherwise `Query`.
pub fn classify(query: &str) -> ActionKind {
    let lowered = query.to_lowercase();
    RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(_, kind)| *kind)
        .unwrap_or(ActionKind::Query)
}
