//! Column-level Last-Writer-Wins merge
//!
//! [`RowState`] accumulates every delta seen for one row key while keeping
//! the HLC and client that wrote each column, so merge results depend only
//! on the delta set, never on arrival order. Each column independently
//! keeps the value with the higher HLC, ties break on the lexicographically
//! greater client id, and a DELETE acts as a sentinel with its own HLC.
//!
//! The buffer folds pushes into a `RowState` per row and appends the
//! synthesised record; the compactor folds whole files into the same
//! structure before classifying rows as live or dead.

use crate::types::{ColumnValue, DeltaOp, HlcTimestamp, RowDelta, RowKey, Value};
use std::collections::HashMap;

/// One column's current winner
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnState {
    /// Winning value
    pub value: Value,
    /// HLC of the delta that wrote it
    pub hlc: HlcTimestamp,
    /// Client that wrote it; LWW tiebreak
    pub client_id: String,
}

/// True when `(hlc, client)` beats `(over_hlc, over_client)` under LWW
/// ordering: higher HLC first, then lexicographically greater client id.
pub fn wins(hlc: HlcTimestamp, client: &str, over_hlc: HlcTimestamp, over_client: &str) -> bool {
    match hlc.cmp(&over_hlc) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => client >= over_client,
    }
}

/// Accumulated LWW state for one row
#[derive(Debug, Clone, Default)]
pub struct RowState {
    /// Destination table
    pub table: String,
    /// Row identifier
    pub row_id: String,
    /// Client of the latest delta applied
    pub client_id: String,
    /// Per-column winners
    pub columns: HashMap<String, ColumnState>,
    /// Highest delta HLC applied
    pub latest_hlc: HlcTimestamp,
    /// Fingerprint of the delta carrying `latest_hlc`
    pub latest_delta_id: String,
    /// Highest DELETE sentinel applied; `ZERO` when none
    pub delete_hlc: HlcTimestamp,
    /// Client of the winning DELETE sentinel
    pub delete_client_id: String,
}

impl RowState {
    /// Start tracking a row from its first delta
    pub fn new(delta: &RowDelta) -> Self {
        let mut state = Self {
            table: delta.table.clone(),
            row_id: delta.row_id.clone(),
            ..Self::default()
        };
        state.apply(delta);
        state
    }

    /// The row key this state tracks
    pub fn row_key(&self) -> RowKey {
        RowKey { table: self.table.clone(), row_id: self.row_id.clone() }
    }

    /// Fold one delta into the state
    pub fn apply(&mut self, delta: &RowDelta) {
        if self.latest_delta_id.is_empty()
            || wins(delta.hlc, &delta.client_id, self.latest_hlc, &self.client_id)
        {
            self.latest_hlc = delta.hlc;
            self.latest_delta_id = delta.delta_id.clone();
            self.client_id = delta.client_id.clone();
        }

        if delta.op == DeltaOp::Delete
            && (self.delete_hlc.is_zero()
                || wins(delta.hlc, &delta.client_id, self.delete_hlc, &self.delete_client_id))
        {
            self.delete_hlc = delta.hlc;
            self.delete_client_id = delta.client_id.clone();
        }

        for col in &delta.columns {
            let beats = match self.columns.get(&col.column) {
                Some(current) => wins(delta.hlc, &delta.client_id, current.hlc, &current.client_id),
                None => true,
            };
            if beats {
                self.columns.insert(
                    col.column.clone(),
                    ColumnState {
                        value: col.value.clone(),
                        hlc: delta.hlc,
                        client_id: delta.client_id.clone(),
                    },
                );
            }
        }
    }

    /// Columns that survive the delete sentinel (strictly newer writes),
    /// name-sorted for deterministic output.
    pub fn surviving_columns(&self) -> Vec<(&String, &ColumnState)> {
        let mut survivors: Vec<(&String, &ColumnState)> = self
            .columns
            .iter()
            .filter(|(_, entry)| self.delete_hlc.is_zero() || entry.hlc > self.delete_hlc)
            .collect();
        survivors.sort_by(|a, b| a.0.cmp(b.0));
        survivors
    }

    /// Dead iff a delete sentinel exists and is at or above every column
    /// write. A row that never accumulated columns is also dead.
    pub fn is_dead(&self) -> bool {
        if self.columns.is_empty() {
            return true;
        }
        !self.delete_hlc.is_zero() && self.columns.values().all(|c| c.hlc <= self.delete_hlc)
    }

    /// Synthesise the merged record the buffer index holds: a live row
    /// becomes an INSERT of the surviving columns, a dead row a bare
    /// DELETE. The record gets a fresh fingerprint; original delta ids
    /// survive only in the dedup set.
    ///
    /// Unlike [`RowState::is_dead`], death here requires a delete sentinel:
    /// a row is only synthesised as a DELETE when one was actually pushed.
    pub fn synthesize(&self) -> RowDelta {
        let dead = !self.delete_hlc.is_zero()
            && self.columns.values().all(|c| c.hlc <= self.delete_hlc);
        let delta = if dead {
            RowDelta {
                op: DeltaOp::Delete,
                table: self.table.clone(),
                row_id: self.row_id.clone(),
                client_id: self.delete_client_id.clone(),
                columns: Vec::new(),
                hlc: if self.delete_hlc.is_zero() { self.latest_hlc } else { self.delete_hlc },
                delta_id: String::new(),
            }
        } else {
            let survivors = self.surviving_columns();
            let mut hlc = HlcTimestamp::ZERO;
            let mut client_id = String::new();
            for (_, entry) in &survivors {
                if wins(entry.hlc, &entry.client_id, hlc, &client_id) {
                    hlc = entry.hlc;
                    client_id = entry.client_id.clone();
                }
            }
            RowDelta {
                op: DeltaOp::Insert,
                table: self.table.clone(),
                row_id: self.row_id.clone(),
                client_id,
                columns: survivors
                    .into_iter()
                    .map(|(column, entry)| ColumnValue {
                        column: column.clone(),
                        value: entry.value.clone(),
                    })
                    .collect(),
                hlc,
                delta_id: String::new(),
            }
        };
        delta.with_fingerprint()
    }
}
