//! Tenant isolation filter.
//!
//! The tenant identifier is always bound as the `$tenantId` parameter, which
//! scopes every templated statement (they reference it explicitly). Free-form
//! queries can additionally be rewritten to filter each matched node on its
//! `tenantId` property when enforcement is enabled.
//!
//! Rewriting is best-effort and NOT a security boundary. Only the simplest
//! shape is handled: a single `MATCH` clause whose node patterns all bind a
//! variable, with no `UNION`, `CALL`, `OPTIONAL MATCH` or comments and with
//! balanced brackets. String literals are skipped when looking for clause
//! keywords. Anything else is passed through unchanged.

use std::sync::OnceLock;

use regex::Regex;

use tenantgraph_core::{Params, TenantId};

/// Name of the bound parameter carrying the tenant identifier.
pub const TENANT_PARAM: &str = "tenantId";

/// Property stamped on every tenant-owned node and relationship.
pub const TENANT_PROPERTY: &str = "tenantId";

/// A query after isolation: final text plus the parameters it adds.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedQuery {
    pub text: String,
    pub extra_parameters: Params,
    pub rewritten: bool,
}

impl ScopedQuery {
    /// Merge the extra parameters over the caller's. A caller-supplied
    /// `tenantId` is overwritten.
    pub fn bind(self, mut caller: Params) -> (String, Params) {
        for (key, value) in self.extra_parameters {
            caller.insert(key, value);
        }
        (self.text, caller)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IsolationFilter {
    enforce: bool,
}

impl IsolationFilter {
    pub fn new(enforce: bool) -> Self {
        Self { enforce }
    }

    pub fn enforces(&self) -> bool {
        self.enforce
    }

    /// Scope `query` to `tenant_id`. Templated statements are never rewritten.
    pub fn scope(&self, query: &str, tenant_id: &TenantId, templated: bool) -> ScopedQuery {
        let mut extra_parameters = Params::new();
        extra_parameters.insert(
            TENANT_PARAM.to_string(),
            serde_json::Value::String(tenant_id.as_str().to_string()),
        );

        let unchanged = |extra_parameters: Params| ScopedQuery {
            text: query.to_string(),
            extra_parameters,
            rewritten: false,
        };

        if templated || !self.enforce {
            return unchanged(extra_parameters);
        }

        match rewrite_with_tenant_filter(query) {
            Ok(text) => {
                tracing::debug!(tenant_id = %tenant_id, "Rewrote free-form query with tenant filter");
                ScopedQuery {
                    text,
                    extra_parameters,
                    rewritten: true,
                }
            }
            Err(reason) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    reason,
                    "Free-form query left unscoped; relying on parameter binding only"
                );
                unchanged(extra_parameters)
            }
        }
    }
}

fn unsupported_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(UNION|CALL|OPTIONAL)\b").unwrap())
}

fn match_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bMATCH\b").unwrap())
}

fn clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(WHERE|RETURN|WITH|SET|DELETE|DETACH|REMOVE|MERGE|CREATE|ORDER|LIMIT|SKIP|UNWIND|FOREACH)\b",
        )
        .unwrap()
    })
}

fn node_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(\s*([A-Za-z_][A-Za-z0-9_]*)?\s*[:{)]").unwrap())
}

/// Inject `var.tenantId = $tenantId` for every node variable of the single
/// MATCH clause. Returns the reason when the query shape is not handled.
///
/// Keywords and brackets are located on a masked copy of the text in which
/// literal and quoted-name contents are blanked; byte offsets line up with
/// `query`, so every splice is made into the caller's original text.
fn rewrite_with_tenant_filter(query: &str) -> Result<String, &'static str> {
    let masked = mask_quoted(query)?;
    if masked.contains("//") || masked.contains("/*") {
        return Err("queries with comments are not rewritten");
    }
    let depth = bracket_depths(&masked)?;

    if unsupported_re().is_match(&masked) {
        return Err("UNION, CALL and OPTIONAL MATCH are not rewritten");
    }

    let mut matches = match_re().find_iter(&masked);
    let clause = matches.next().ok_or("no MATCH clause")?;
    if matches.next().is_some() {
        return Err("multiple MATCH clauses are not rewritten");
    }
    if depth[clause.start()] != 0 {
        return Err("nested MATCH clauses are not rewritten");
    }

    let pattern_start = clause.end();
    let next_clause = top_level_clause(&masked, &depth, pattern_start);
    let pattern_end = next_clause.map(|m| m.start()).unwrap_or(query.len());
    let pattern = &masked[pattern_start..pattern_end];
    if pattern.contains('`') {
        return Err("quoted names in the MATCH pattern are not rewritten");
    }

    let mut variables: Vec<&str> = Vec::new();
    for caps in node_re().captures_iter(pattern) {
        let var = caps
            .get(1)
            .ok_or("anonymous node patterns cannot be filtered")?
            .as_str();
        if !variables.contains(&var) {
            variables.push(var);
        }
    }
    if variables.is_empty() {
        return Err("no node patterns found");
    }

    let filter = variables
        .iter()
        .map(|v| format!("{v}.{TENANT_PROPERTY} = ${TENANT_PARAM}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let rewritten = match next_clause {
        Some(kw) if kw.as_str().eq_ignore_ascii_case("WHERE") => {
            let predicate_end = top_level_clause(&masked, &depth, kw.end())
                .map(|m| m.start())
                .unwrap_or(query.len());
            bracket_depths(&masked[kw.end()..predicate_end])?;
            let predicate = query[kw.end()..predicate_end].trim();
            join_clause(
                &format!("{} {filter} AND ({predicate})", &query[..kw.end()]),
                &query[predicate_end..],
            )
        }
        _ => join_clause(
            &format!("{} WHERE {filter}", query[..pattern_end].trim_end()),
            &query[pattern_end..],
        ),
    };

    Ok(rewritten)
}

/// First clause keyword at or after `from` that sits outside any bracket.
fn top_level_clause<'q>(
    masked: &'q str,
    depth: &[usize],
    from: usize,
) -> Option<regex::Match<'q>> {
    clause_re()
        .find_iter(masked)
        .find(|m| m.start() >= from && depth[m.start()] == 0)
}

/// Copy of `query` with the contents of `'...'`, `"..."` and `` `...` ``
/// spans replaced by spaces. Delimiters are kept and byte offsets preserved.
fn mask_quoted(query: &str) -> Result<String, &'static str> {
    let mut masked = Vec::with_capacity(query.len());
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for &b in query.as_bytes() {
        match quote {
            None => {
                if matches!(b, b'\'' | b'"' | b'`') {
                    quote = Some(b);
                }
                masked.push(b);
            }
            Some(q) => {
                if escaped {
                    escaped = false;
                    masked.push(b' ');
                } else if b == b'\\' && q != b'`' {
                    escaped = true;
                    masked.push(b' ');
                } else if b == q {
                    quote = None;
                    masked.push(b);
                } else {
                    masked.push(b' ');
                }
            }
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal");
    }
    String::from_utf8(masked).map_err(|_| "query text is not valid UTF-8")
}

/// Bracket nesting depth before each byte of `masked`. Fails unless every
/// `(`, `[` and `{` is closed in order.
fn bracket_depths(masked: &str) -> Result<Vec<usize>, &'static str> {
    let mut depths = Vec::with_capacity(masked.len());
    let mut open: Vec<u8> = Vec::new();

    for &b in masked.as_bytes() {
        depths.push(open.len());
        match b {
            b'(' | b'[' | b'{' => open.push(b),
            b')' | b']' | b'}' => {
                let expected = match b {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                if open.pop() != Some(expected) {
                    return Err("unbalanced brackets");
                }
            }
            _ => {}
        }
    }

    if open.is_empty() {
        Ok(depths)
    } else {
        Err("unbalanced brackets")
    }
}

fn join_clause(head: &str, tail: &str) -> String {
    let tail = tail.trim();
    if tail.is_empty() {
        head.to_string()
    } else {
        format!("{head} {tail}")
    }
}
