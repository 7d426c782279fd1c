//! In-memory delta buffer
//!
//! Dual structure under one guarded state: an append-only log (flush order)
//! and a row index (LWW merge lookups), plus a fingerprint set for
//! idempotent ingestion and per-table accounting for budget-driven flushes.
//!
//! Mutations run inside a short critical section and observers only ever
//! receive owned, consistent views; entries are `Arc`ed so views are cheap.
//!
//! The log is queried by HLC with a binary search. Append order matches
//! non-strict HLC order only because every server-side append passes through
//! `HlcClock::recv` first; pulls that bypass the buffer make no such claim.

use crate::sync::merge::RowState;
use crate::types::{HlcTimestamp, RowDelta, RowKey};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-table counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableStats {
    /// Number of buffered deltas for the table
    pub delta_count: usize,
    /// Estimated bytes buffered for the table
    pub estimated_bytes: usize,
}

/// Owned, consistent view of the whole buffer
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    /// Append-only log in arrival order
    pub log: Vec<Arc<RowDelta>>,
    /// Latest delta per row
    pub index: HashMap<RowKey, Arc<RowDelta>>,
    /// Fingerprints of every appended delta
    pub delta_ids: HashSet<String>,
    /// Estimated payload bytes
    pub estimated_bytes: usize,
    /// When the oldest buffered entry arrived, if any
    pub oldest_at: Option<Instant>,
    /// Estimated bytes per table
    pub table_bytes: HashMap<String, usize>,
    /// Log filtered per table, in arrival order
    pub table_log: HashMap<String, Vec<Arc<RowDelta>>>,
}

/// A drained batch, handed to the flush coordinator. Carries enough state to
/// restore the buffer if persistence fails.
#[derive(Debug)]
pub struct DrainedBatch {
    /// Drained deltas in log order
    pub deltas: Vec<Arc<RowDelta>>,
    /// Estimated bytes at drain time
    pub estimated_bytes: usize,
    /// Age marker of the drained entries
    pub oldest_at: Option<Instant>,
}

impl DrainedBatch {
    /// True when nothing was drained
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Outcome of an LWW merge-append
#[derive(Debug)]
pub struct MergeOutcome {
    /// The record that entered the log: the delta itself on first write,
    /// otherwise the synthesised merge
    pub appended: Arc<RowDelta>,
    /// Whether an existing row was merged
    pub merged: bool,
}

#[derive(Debug, Default)]
struct BufferState {
    log: Vec<Arc<RowDelta>>,
    index: HashMap<RowKey, Arc<RowDelta>>,
    // Per-row LWW lineage; keeps per-column HLCs so merge results depend
    // only on the delta set, not arrival order.
    states: HashMap<RowKey, RowState>,
    delta_ids: HashSet<String>,
    estimated_bytes: usize,
    oldest_at: Option<Instant>,
    table_bytes: HashMap<String, usize>,
    table_counts: HashMap<String, usize>,
}

impl BufferState {
    fn append(&mut self, delta: RowDelta) -> Arc<RowDelta> {
        let delta = Arc::new(delta);
        let size = delta.estimated_size();
        self.log.push(Arc::clone(&delta));
        self.index.insert(delta.row_key(), Arc::clone(&delta));
        self.delta_ids.insert(delta.delta_id.clone());
        self.estimated_bytes += size;
        *self.table_bytes.entry(delta.table.clone()).or_default() += size;
        *self.table_counts.entry(delta.table.clone()).or_default() += 1;
        self.oldest_at.get_or_insert_with(Instant::now);
        delta
    }
}

/// Append-only delta staging between push and flush
#[derive(Debug, Default)]
pub struct DeltaBuffer {
    state: RwLock<BufferState>,
}

impl DeltaBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta: extend the log, overwrite the row index, record the
    /// fingerprint and update accounting. Duplicate fingerprints are
    /// permitted here; dedup is the ingestion coordinator's job.
    pub fn append(&self, delta: RowDelta) -> Arc<RowDelta> {
        let mut state = self.state.write();
        match state.states.remove(&delta.row_key()) {
            Some(mut row) => {
                row.apply(&delta);
                state.states.insert(delta.row_key(), row);
            }
            None => {
                state.states.insert(delta.row_key(), RowState::new(&delta));
            }
        }
        state.append(delta)
    }

    /// LWW merge-append: the first delta for a row enters the log as-is;
    /// later deltas fold into the row's lineage and the synthesised merge
    /// is appended instead. The incoming fingerprint is always recorded so
    /// retries stay idempotent. Runs atomically under the write lock, so
    /// concurrent pushes to the same row serialise here.
    pub fn merge_append(&self, incoming: RowDelta) -> MergeOutcome {
        let mut state = self.state.write();
        let key = incoming.row_key();
        match state.states.remove(&key) {
            Some(mut row) => {
                row.apply(&incoming);
                let merged = row.synthesize();
                state.states.insert(key, row);
                state.delta_ids.insert(incoming.delta_id.clone());
                let appended = state.append(merged);
                MergeOutcome { appended, merged: true }
            }
            None => {
                state.states.insert(key, RowState::new(&incoming));
                let appended = state.append(incoming);
                MergeOutcome { appended, merged: false }
            }
        }
    }

    /// O(1) row lookup
    pub fn get_row(&self, key: &RowKey) -> Option<Arc<RowDelta>> {
        self.state.read().index.get(key).cloned()
    }

    /// O(1) fingerprint lookup
    pub fn has_delta(&self, delta_id: &str) -> bool {
        self.state.read().delta_ids.contains(delta_id)
    }

    /// Page of deltas strictly after `since`, in log order, with a
    /// `has_more` flag. Binary-searches the log.
    pub fn events_since(&self, since: HlcTimestamp, limit: usize) -> (Vec<Arc<RowDelta>>, bool) {
        let state = self.state.read();
        let start = state.log.partition_point(|d| d.hlc <= since);
        let end = (start + limit).min(state.log.len());
        let page = state.log[start..end].to_vec();
        let has_more = end < state.log.len();
        (page, has_more)
    }

    /// Flush predicate: non-empty AND (bytes ≥ `max_bytes` OR age ≥
    /// `max_age`)
    pub fn should_flush(&self, max_bytes: usize, max_age: Duration) -> bool {
        let state = self.state.read();
        if state.log.is_empty() {
            return false;
        }
        if state.estimated_bytes >= max_bytes {
            return true;
        }
        state
            .oldest_at
            .map(|at| at.elapsed() >= max_age)
            .unwrap_or(false)
    }

    /// Estimated payload bytes currently buffered
    pub fn estimated_bytes(&self) -> usize {
        self.state.read().estimated_bytes
    }

    /// Number of buffered log entries
    pub fn len(&self) -> usize {
        self.state.read().log.len()
    }

    /// True when the log is empty
    pub fn is_empty(&self) -> bool {
        self.state.read().log.is_empty()
    }

    /// Per-table counters
    pub fn table_stats(&self) -> HashMap<String, TableStats> {
        let state = self.state.read();
        state
            .table_counts
            .iter()
            .map(|(table, &delta_count)| {
                let estimated_bytes = state.table_bytes.get(table).copied().unwrap_or(0);
                (table.clone(), TableStats { delta_count, estimated_bytes })
            })
            .collect()
    }

    /// Estimated bytes buffered for one table
    pub fn table_bytes(&self, table: &str) -> usize {
        self.state.read().table_bytes.get(table).copied().unwrap_or(0)
    }

    /// Drain the whole buffer, leaving it empty
    pub fn drain(&self) -> DrainedBatch {
        let mut state = self.state.write();
        let batch = DrainedBatch {
            deltas: std::mem::take(&mut state.log),
            estimated_bytes: state.estimated_bytes,
            oldest_at: state.oldest_at,
        };
        state.index.clear();
        state.states.clear();
        state.delta_ids.clear();
        state.estimated_bytes = 0;
        state.oldest_at = None;
        state.table_bytes.clear();
        state.table_counts.clear();
        batch
    }

    /// Drain a single table's entries, leaving the rest untouched
    pub fn drain_table(&self, table: &str) -> DrainedBatch {
        let mut state = self.state.write();
        let oldest_at = state.oldest_at;
        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(state.log.len());
        for delta in std::mem::take(&mut state.log) {
            if delta.table == table {
                drained.push(delta);
            } else {
                kept.push(delta);
            }
        }
        state.log = kept;

        let mut bytes = 0;
        for delta in &drained {
            state.index.remove(&delta.row_key());
            state.states.remove(&delta.row_key());
            state.delta_ids.remove(&delta.delta_id);
            bytes += delta.estimated_size();
        }
        state.estimated_bytes = state.estimated_bytes.saturating_sub(bytes);
        state.table_bytes.remove(table);
        state.table_counts.remove(table);
        if state.log.is_empty() {
            state.oldest_at = None;
        }

        DrainedBatch { deltas: drained, estimated_bytes: bytes, oldest_at }
    }

    /// Put a drained batch back after a failed flush. The batch predates
    /// anything appended mid-flush, so it is prepended to the log; index
    /// entries are only re-inserted where no newer delta claimed the row.
    pub fn restore(&self, batch: DrainedBatch) {
        if batch.is_empty() {
            return;
        }
        let mut state = self.state.write();
        let mut log = Vec::with_capacity(batch.deltas.len() + state.log.len());
        log.extend(batch.deltas.iter().cloned());
        log.append(&mut state.log);
        state.log = log;
        for delta in &batch.deltas {
            let key = delta.row_key();
            state.index.entry(key.clone()).or_insert_with(|| Arc::clone(delta));
            // Folding restored deltas back into the lineage is order-safe:
            // LWW application commutes.
            match state.states.remove(&key) {
                Some(mut row) => {
                    row.apply(delta);
                    state.states.insert(key, row);
                }
                None => {
                    state.states.insert(key, RowState::new(delta));
                }
            }
            state.delta_ids.insert(delta.delta_id.clone());
            let size = delta.estimated_size();
            state.estimated_bytes += size;
            *state.table_bytes.entry(delta.table.clone()).or_default() += size;
            *state.table_counts.entry(delta.table.clone()).or_default() += 1;
        }
        state.oldest_at = match (state.oldest_at, batch.oldest_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    /// Owned, consistent view of the full state
    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.state.read();
        let mut table_log: HashMap<String, Vec<Arc<RowDelta>>> = HashMap::new();
        for delta in &state.log {
            table_log.entry(delta.table.clone()).or_default().push(Arc::clone(delta));
        }
        BufferSnapshot {
            log: state.log.clone(),
            index: state.index.clone(),
            delta_ids: state.delta_ids.clone(),
            estimated_bytes: state.estimated_bytes,
            oldest_at: state.oldest_at,
            table_bytes: state.table_bytes.clone(),
            table_log,
        }
    }

    /// Discard everything
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = BufferState::default();
    }
}
