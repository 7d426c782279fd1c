//! Delta file compactor
//!
//! Merges many small flushed delta files into consolidated base files plus
//! an equality-delete file. Files are processed incrementally: each decoded
//! delta folds into per-row LWW state, so memory scales with distinct rows,
//! not with total deltas. Rows are emitted in sorted row-key order, which
//! makes output independent of input-file permutation.

use crate::codec::ParquetCodec;
use crate::core::config::CompactionConfig;
use crate::core::error::CompactionError;
use crate::storage::adapters::{ObjectStore, CONTENT_TYPE_PARQUET};
use crate::sync::merge::RowState;
use crate::system::metrics::Metrics;
use crate::types::{DeltaOp, RowDelta, RowKey, TableSchema};
use rand::distr::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters for one compaction cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Base files produced
    pub base_files_written: usize,
    /// Equality-delete files produced
    pub delete_files_written: usize,
    /// Input delta files consumed
    pub delta_files_compacted: usize,
    /// Bytes read from input files
    pub bytes_read: usize,
    /// Bytes written to output files
    pub bytes_written: usize,
}

/// Multi-file LWW resolution into base + equality-delete files
pub struct Compactor {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn ParquetCodec>,
    schema: Option<TableSchema>,
    config: CompactionConfig,
}

/// Unique output-file suffix: `{unixMillis}-{random6}`
pub(crate) fn file_timestamp() -> String {
    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{unix_ms}-{suffix}")
}

impl Compactor {
    /// Create a compactor over a store and codec
    pub fn new(
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn ParquetCodec>,
        config: CompactionConfig,
    ) -> Self {
        Self { store, codec, schema: None, config }
    }

    /// Schema used to project base-file columns into declaration order
    pub fn with_schema(mut self, schema: TableSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Compact up to `max_delta_files` input files under `output_prefix`.
    /// Fewer than `min_delta_files` inputs is a no-op with a zero report.
    pub async fn compact(
        &self,
        delta_file_keys: &[String],
        output_prefix: &str,
    ) -> Result<CompactionReport, CompactionError> {
        let mut report = CompactionReport::default();
        if delta_file_keys.len() < self.config.min_delta_files {
            tracing::debug!(
                files = delta_file_keys.len(),
                min = self.config.min_delta_files,
                "not enough delta files to compact"
            );
            return Ok(report);
        }

        let keys = &delta_file_keys[..delta_file_keys.len().min(self.config.max_delta_files)];
        let mut rows: HashMap<RowKey, RowState> = HashMap::new();

        for key in keys {
            let bytes = self.store.get_object(key).await.map_err(|source| {
                CompactionError::Read { key: key.clone(), source }
            })?;
            report.bytes_read += bytes.len();

            let deltas = self.codec.read_deltas(&bytes).map_err(|err| {
                CompactionError::Parse { key: key.clone(), message: err.0 }
            })?;
            for delta in &deltas {
                match rows.get_mut(&delta.row_key()) {
                    Some(state) => state.apply(delta),
                    None => {
                        rows.insert(delta.row_key(), RowState::new(delta));
                    }
                }
            }
        }
        report.delta_files_compacted = keys.len();

        let mut live: Vec<(RowKey, RowDelta)> = Vec::new();
        let mut dead: Vec<(RowKey, RowDelta)> = Vec::new();
        for (key, state) in &rows {
            if state.is_dead() {
                dead.push((key.clone(), self.tombstone_row(state)));
            } else {
                live.push((key.clone(), self.base_row(state)));
            }
        }
        // Sorted emission keeps output identical across input permutations.
        live.sort_by(|a, b| a.0.cmp(&b.0));
        dead.sort_by(|a, b| a.0.cmp(&b.0));

        self.write_base_files(&mut report, live, output_prefix).await?;
        self.write_delete_file(&mut report, dead, output_prefix).await?;

        Metrics::global().maintenance.compactions_total.inc();
        Metrics::global()
            .maintenance
            .base_files_written
            .inc_by(report.base_files_written as u64);
        Metrics::global()
            .maintenance
            .delete_files_written
            .inc_by(report.delete_files_written as u64);

        tracing::info!(
            inputs = report.delta_files_compacted,
            base_files = report.base_files_written,
            delete_files = report.delete_files_written,
            bytes_read = report.bytes_read,
            bytes_written = report.bytes_written,
            "compaction complete"
        );
        Ok(report)
    }

    // A live row projected to schema column order; columns unknown to the
    // schema follow, name-sorted.
    fn base_row(&self, state: &RowState) -> RowDelta {
        let mut survivors = state.surviving_columns();
        if let Some(schema) = &self.schema {
            survivors.sort_by(|a, b| {
                let pa = schema.column_position(a.0).unwrap_or(usize::MAX);
                let pb = schema.column_position(b.0).unwrap_or(usize::MAX);
                pa.cmp(&pb).then_with(|| a.0.cmp(b.0))
            });
        }
        RowDelta {
            op: DeltaOp::Insert,
            table: state.table.clone(),
            row_id: state.row_id.clone(),
            client_id: state.client_id.clone(),
            columns: survivors
                .into_iter()
                .map(|(column, entry)| crate::types::ColumnValue {
                    column: column.clone(),
                    value: entry.value.clone(),
                })
                .collect(),
            hlc: state.latest_hlc,
            delta_id: state.latest_delta_id.clone(),
        }
    }

    // Equality delete: only the row key is populated.
    fn tombstone_row(&self, state: &RowState) -> RowDelta {
        RowDelta {
            op: DeltaOp::Delete,
            table: state.table.clone(),
            row_id: state.row_id.clone(),
            client_id: String::new(),
            columns: Vec::new(),
            hlc: if state.delete_hlc.is_zero() { state.latest_hlc } else { state.delete_hlc },
            delta_id: String::new(),
        }
    }

    async fn write_base_files(
        &self,
        report: &mut CompactionReport,
        live: Vec<(RowKey, RowDelta)>,
        output_prefix: &str,
    ) -> Result<(), CompactionError> {
        if live.is_empty() {
            return Ok(());
        }

        // Split at the target size so one oversized input set does not
        // produce one oversized base file.
        let mut pending: Vec<Arc<RowDelta>> = Vec::new();
        let mut pending_bytes = 0usize;
        for (_, row) in live {
            pending_bytes += row.estimated_size();
            pending.push(Arc::new(row));
            if pending_bytes >= self.config.target_file_size_bytes {
                self.write_file(report, &pending, output_prefix, "base").await?;
                report.base_files_written += 1;
                pending.clear();
                pending_bytes = 0;
            }
        }
        if !pending.is_empty() {
            self.write_file(report, &pending, output_prefix, "base").await?;
            report.base_files_written += 1;
        }
        Ok(())
    }

    async fn write_delete_file(
        &self,
        report: &mut CompactionReport,
        dead: Vec<(RowKey, RowDelta)>,
        output_prefix: &str,
    ) -> Result<(), CompactionError> {
        if dead.is_empty() {
            return Ok(());
        }
        let rows: Vec<Arc<RowDelta>> = dead.into_iter().map(|(_, row)| Arc::new(row)).collect();
        self.write_file(report, &rows, output_prefix, "delete").await?;
        report.delete_files_written += 1;
        Ok(())
    }

    async fn write_file(
        &self,
        report: &mut CompactionReport,
        rows: &[Arc<RowDelta>],
        output_prefix: &str,
        kind: &str,
    ) -> Result<(), CompactionError> {
        let bytes = self
            .codec
            .write_deltas(rows, self.schema.as_ref())
            .map_err(|err| CompactionError::Write(err.0))?;
        let key = format!("{output_prefix}/{kind}-{}.parquet", file_timestamp());
        report.bytes_written += bytes.len();
        self.store
            .put_object(&key, bytes, CONTENT_TYPE_PARQUET)
            .await
            .map_err(CompactionError::Store)?;
        Ok(())
    }
}
