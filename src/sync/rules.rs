//! Bucket-based sync rules
//!
//! Pull streams are post-filtered by declarative buckets: a delta is
//! delivered when at least one bucket names its table and every filter in
//! that bucket matches. Filter values may reference JWT claims with the
//! `"jwt:<claim>"` form; a missing claim or column simply fails the filter.

use crate::types::{DeltaOp, RowDelta};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Filter comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equal
    Eq,
    /// Not equal
    Neq,
    /// Member of an array value
    In,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater or equal
    Gte,
    /// Less or equal
    Lte,
}

/// One column predicate inside a bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketFilter {
    /// Column the predicate reads
    pub column: String,
    /// Comparison operator
    pub op: FilterOp,
    /// Literal value, or a `"jwt:<claim>"` reference resolved per client
    pub value: serde_json::Value,
}

/// A named subset of tables and filters a client is authorised to see
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    /// Bucket name, for diagnostics
    pub name: String,
    /// Tables the bucket covers
    pub tables: Vec<String>,
    /// Predicates; all must match
    #[serde(default)]
    pub filters: Vec<BucketFilter>,
}

/// The declarative rule set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRules {
    /// Buckets; a delta passes if any bucket admits it
    pub buckets: Vec<Bucket>,
}

/// Rules plus the requesting client's JWT claims
#[derive(Debug, Clone, Default)]
pub struct SyncRulesContext {
    /// Claims extracted from the client's token
    pub claims: HashMap<String, serde_json::Value>,
    /// The rule set in force
    pub rules: SyncRules,
}

impl SyncRulesContext {
    /// True when some bucket admits the delta
    pub fn allows(&self, delta: &RowDelta) -> bool {
        self.rules.buckets.iter().any(|bucket| bucket.admits(delta, &self.claims))
    }
}

impl Bucket {
    fn admits(&self, delta: &RowDelta, claims: &HashMap<String, serde_json::Value>) -> bool {
        if !self.tables.iter().any(|t| t == &delta.table) {
            return false;
        }
        // Tombstones carry no columns to evaluate; the table match decides.
        if delta.op == DeltaOp::Delete && delta.columns.is_empty() {
            return true;
        }
        self.filters.iter().all(|filter| filter.matches(delta, claims))
    }
}

impl BucketFilter {
    fn resolve(&self, claims: &HashMap<String, serde_json::Value>) -> Option<serde_json::Value> {
        if let serde_json::Value::String(s) = &self.value {
            if let Some(claim) = s.strip_prefix("jwt:") {
                return claims.get(claim).cloned();
            }
        }
        Some(self.value.clone())
    }

    fn matches(&self, delta: &RowDelta, claims: &HashMap<String, serde_json::Value>) -> bool {
        let Some(expected) = self.resolve(claims) else { return false };
        let Some(actual) = delta.column(&self.column) else { return false };
        let actual = actual.to_json();
        match self.op {
            FilterOp::Eq => json_eq(&actual, &expected),
            FilterOp::Neq => !json_eq(&actual, &expected),
            FilterOp::In => expected
                .as_array()
                .map(|candidates| candidates.iter().any(|v| json_eq(&actual, v)))
                .unwrap_or(false),
            FilterOp::Gt => json_cmp(&actual, &expected) == Some(Ordering::Greater),
            FilterOp::Lt => json_cmp(&actual, &expected) == Some(Ordering::Less),
            FilterOp::Gte => matches!(
                json_cmp(&actual, &expected),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            FilterOp::Lte => matches!(
                json_cmp(&actual, &expected),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
        }
    }
}

// Numeric comparison coerces integer and float representations of the same
// quantity; everything else compares structurally.
fn json_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn json_cmp(a: &serde_json::Value, b: &serde_json::Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

/// Keep only the deltas the context admits, preserving order
pub fn filter_deltas(
    deltas: Vec<Arc<RowDelta>>,
    context: &SyncRulesContext,
) -> Vec<Arc<RowDelta>> {
    deltas.into_iter().filter(|d| context.allows(d)).collect()
}
