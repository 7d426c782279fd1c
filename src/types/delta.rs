//! Row delta records and sync wire structures
//!
//! A [`RowDelta`] is the fundamental change record: one row-level
//! INSERT/UPDATE/DELETE tagged with a hybrid logical clock and a stable
//! SHA-256 fingerprint used for idempotent ingestion.

use crate::types::hlc::HlcTimestamp;
use crate::types::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Row-level operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaOp {
    /// Create a row (also the op carried by merged live rows)
    Insert,
    /// Update columns on an existing row
    Update,
    /// Tombstone a row; carries no columns
    Delete,
}

/// One named column change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnValue {
    /// Column name; must be a safe identifier
    pub column: String,
    /// New value
    pub value: Value,
}

impl ColumnValue {
    /// Convenience constructor
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { column: column.into(), value: value.into() }
    }
}

/// `(table, rowId)` tuple identifying a row for O(1) in-buffer lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    /// Destination table
    pub table: String,
    /// Opaque row identifier, unique within the table
    pub row_id: String,
}

/// The fundamental change record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDelta {
    /// Operation kind
    pub op: DeltaOp,
    /// Destination table; validated as a safe identifier on ingest
    pub table: String,
    /// Row identifier, unique within `table`
    pub row_id: String,
    /// Originating client; deterministic tiebreak in LWW merges
    pub client_id: String,
    /// Ordered column changes; empty for DELETE
    #[serde(default)]
    pub columns: Vec<ColumnValue>,
    /// Hybrid logical clock stamp
    pub hlc: HlcTimestamp,
    /// SHA-256 fingerprint over the canonical form, used for idempotency
    pub delta_id: String,
}

impl RowDelta {
    /// The row key for index lookups
    pub fn row_key(&self) -> RowKey {
        RowKey { table: self.table.clone(), row_id: self.row_id.clone() }
    }

    /// Compute the stable fingerprint: lowercase-hex SHA-256 over the
    /// canonical `op|table|rowId|clientId|hlc|col=value|...` form. Nested
    /// JSON serialises with sorted keys, so equal content always hashes
    /// equal.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(match self.op {
            DeltaOp::Insert => b"INSERT".as_slice(),
            DeltaOp::Update => b"UPDATE".as_slice(),
            DeltaOp::Delete => b"DELETE".as_slice(),
        });
        for part in [&self.table, &self.row_id, &self.client_id] {
            hasher.update(b"|");
            hasher.update(part.as_bytes());
        }
        hasher.update(b"|");
        hasher.update(self.hlc.as_u64().to_string().as_bytes());
        for col in &self.columns {
            hasher.update(b"|");
            hasher.update(col.column.as_bytes());
            hasher.update(b"=");
            let encoded = serde_json::to_string(&col.value).unwrap_or_default();
            hasher.update(encoded.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Set `delta_id` from the canonical fingerprint
    pub fn with_fingerprint(mut self) -> Self {
        self.delta_id = self.fingerprint();
        self
    }

    /// Type-aware byte estimate used for buffer accounting and
    /// backpressure decisions
    pub fn estimated_size(&self) -> usize {
        // Fixed record overhead plus two bytes per identifier character.
        let mut size = 32;
        size += 2 * (self.table.len() + self.row_id.len() + self.client_id.len());
        size += self.delta_id.len();
        size += 8; // hlc
        for col in &self.columns {
            size += 2 * col.column.len();
            size += col.value.estimated_size();
        }
        size
    }

    /// Look up a column value by name
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|c| c.column == name).map(|c| &c.value)
    }
}

/// Inclusive HLC range covered by a flushed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HlcRange {
    /// Smallest HLC in the file
    pub min: HlcTimestamp,
    /// Largest HLC in the file
    pub max: HlcTimestamp,
}

impl HlcRange {
    /// Compute the bounds over a non-empty delta slice; `None` when empty
    pub fn over<'a, I>(deltas: I) -> Option<HlcRange>
    where
        I: IntoIterator<Item = &'a RowDelta>,
    {
        let mut range: Option<HlcRange> = None;
        for d in deltas {
            range = Some(match range {
                None => HlcRange { min: d.hlc, max: d.hlc },
                Some(r) => HlcRange { min: r.min.min(d.hlc), max: r.max.max(d.hlc) },
            });
        }
        range
    }
}

/// A client push request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPush {
    /// Claimed client identity; checked against the transport binding
    pub client_id: String,
    /// Deltas in client-intended order
    pub deltas: Vec<RowDelta>,
    /// Highest server HLC the client has observed
    #[serde(default)]
    pub last_seen_hlc: HlcTimestamp,
}

/// A client pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPull {
    /// Requesting client identity
    pub client_id: String,
    /// Return deltas strictly after this HLC
    #[serde(default)]
    pub since_hlc: HlcTimestamp,
    /// Page size
    pub max_deltas: usize,
    /// Optional named source adapter to pull through instead of the buffer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Incremental change stream page; also the checkpoint chunk payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// The page of deltas
    pub deltas: Vec<RowDelta>,
    /// Server clock after serving the page
    pub server_hlc: HlcTimestamp,
    /// Whether more deltas remain after this page
    pub has_more: bool,
}

/// JSON flush file envelope (`flushFormat = json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushEnvelope {
    /// Envelope format version; currently 1
    pub version: u32,
    /// Gateway that produced the file
    pub gateway_id: String,
    /// Production time
    pub created_at: DateTime<Utc>,
    /// HLC bounds over `deltas`
    pub hlc_range: HlcRange,
    /// Number of deltas in the file
    pub delta_count: usize,
    /// Estimated payload size at drain time
    pub byte_size: usize,
    /// The drained deltas in log order
    pub deltas: Vec<RowDelta>,
}

/// Envelope format version written by this gateway
pub const FLUSH_ENVELOPE_VERSION: u32 = 1;

/// Checkpoint manifest describing the chunk set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointManifest {
    /// HLC the snapshot was taken at
    pub snapshot_hlc: HlcTimestamp,
    /// Generation time
    pub generated_at: DateTime<Utc>,
    /// Number of chunk files
    pub chunk_count: usize,
    /// Total deltas across all chunks
    pub total_deltas: usize,
    /// Object keys of the chunk files, in order
    pub chunks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(hlc: u64) -> RowDelta {
        RowDelta {
            op: DeltaOp::Insert,
            table: "todos".into(),
            row_id: "r1".into(),
            client_id: "client-a".into(),
            columns: vec![
                ColumnValue::new("title", "buy milk"),
                ColumnValue::new("done", false),
            ],
            hlc: HlcTimestamp::from_u64(hlc),
            delta_id: String::new(),
        }
        .with_fingerprint()
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = delta(100);
        let b = delta(100);
        assert_eq!(a.delta_id, b.delta_id);
        assert_eq!(a.delta_id.len(), 64);

        let mut c = delta(100);
        c.columns[0].value = Value::Str("buy bread".into());
        assert_ne!(a.delta_id, c.with_fingerprint().delta_id);

        let d = delta(101);
        assert_ne!(a.delta_id, d.delta_id);
    }

    #[test]
    fn wire_format_uses_camel_case_and_string_hlcs() {
        let d = delta(HlcTimestamp::encode(1_000_000, 0).as_u64());
        let wire = serde_json::to_value(&d).unwrap();
        assert_eq!(wire["op"], "INSERT");
        assert_eq!(wire["rowId"], "r1");
        assert_eq!(wire["clientId"], "client-a");
        assert_eq!(wire["hlc"], HlcTimestamp::encode(1_000_000, 0).as_u64().to_string());
        assert!(wire["deltaId"].is_string());

        let back: RowDelta = serde_json::from_value(wire).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn delete_deserializes_without_columns() {
        let wire = serde_json::json!({
            "op": "DELETE",
            "table": "todos",
            "rowId": "r9",
            "clientId": "c",
            "hlc": "655360000",
            "deltaId": "d9"
        });
        let d: RowDelta = serde_json::from_value(wire).unwrap();
        assert_eq!(d.op, DeltaOp::Delete);
        assert!(d.columns.is_empty());
    }

    #[test]
    fn hlc_range_bounds() {
        let deltas = vec![delta(300), delta(100), delta(200)];
        let range = HlcRange::over(deltas.iter()).unwrap();
        assert_eq!(range.min.as_u64(), 100);
        assert_eq!(range.max.as_u64(), 300);
        assert!(HlcRange::over(std::iter::empty()).is_none());
    }

    #[test]
    fn estimated_size_counts_columns() {
        let with_columns = delta(100);
        let without = RowDelta { columns: Vec::new(), ..delta(100) };
        assert!(with_columns.estimated_size() > without.estimated_size());
    }
}
