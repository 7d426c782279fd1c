//! Flush coordinator
//!
//! Drains the buffer and persists the batch as one immutable file (or one
//! database insert), restoring the buffer on failure so the next attempt
//! re-covers the same deltas. A single boolean guard enforces one in-flight
//! flush per gateway; the guard is reset on every exit path, including
//! early returns, via its Drop.

use crate::codec::ParquetCodec;
use crate::core::config::FlushFormat;
use crate::core::error::{Error, FlushError};
use crate::flush::queue::{FlushContext, FlushQueue};
use crate::storage::adapters::{
    Catalogue, DataFile, DatabaseAdapter, ObjectStore, CONTENT_TYPE_JSON, CONTENT_TYPE_PARQUET,
};
use crate::storage::buffer::{DeltaBuffer, DrainedBatch};
use crate::system::metrics::Metrics;
use crate::types::{FlushEnvelope, HlcRange, TableSchema, FLUSH_ENVELOPE_VERSION};
use bytes::Bytes;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where a flush lands, as an explicit capability
pub enum FlushTarget {
    /// Row inserts into a relational adapter
    Database(Arc<dyn DatabaseAdapter>),
    /// One immutable file per flush in an object store
    ObjectStore(Arc<dyn ObjectStore>),
}

/// Outcome of one flush
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Deltas persisted
    pub deltas_flushed: usize,
    /// Payload bytes written (0 for database targets)
    pub bytes_written: usize,
    /// Object key written, for object-store targets
    pub object_key: Option<String>,
}

// RAII reset of the in-flight flag; runs on every exit path.
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, FlushError> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FlushError::InProgress);
        }
        Ok(Self(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight drain → serialise → persist pipeline
pub struct FlushCoordinator {
    gateway_id: String,
    format: FlushFormat,
    key_prefix: Option<String>,
    table_schema: Option<TableSchema>,
    parquet: Option<Arc<dyn ParquetCodec>>,
    catalogue: Option<Arc<dyn Catalogue>>,
    catalogue_namespace: Vec<String>,
    flush_queue: Option<Arc<dyn FlushQueue>>,
    flushing: AtomicBool,
}

impl FlushCoordinator {
    /// Create a coordinator for a gateway
    pub fn new(gateway_id: impl Into<String>, format: FlushFormat) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            format,
            key_prefix: None,
            table_schema: None,
            parquet: None,
            catalogue: None,
            catalogue_namespace: Vec::new(),
            flush_queue: None,
            flushing: AtomicBool::new(false),
        }
    }

    /// Prefix inserted into object keys before the HLC range
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Schema required for parquet flushes and catalogue commits
    pub fn with_table_schema(mut self, schema: TableSchema) -> Self {
        self.table_schema = Some(schema);
        self
    }

    /// Parquet codec for `FlushFormat::Parquet`
    pub fn with_parquet_codec(mut self, codec: Arc<dyn ParquetCodec>) -> Self {
        self.parquet = Some(codec);
        self
    }

    /// Optional catalogue, committed to after parquet flushes
    pub fn with_catalogue(
        mut self,
        catalogue: Arc<dyn Catalogue>,
        namespace: Vec<String>,
    ) -> Self {
        self.catalogue = Some(catalogue);
        self.catalogue_namespace = namespace;
        self
    }

    /// Optional post-flush materialisation queue
    pub fn with_flush_queue(mut self, queue: Arc<dyn FlushQueue>) -> Self {
        self.flush_queue = Some(queue);
        self
    }

    /// Whether a flush is currently in flight
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Flush the whole buffer
    pub async fn flush(
        &self,
        buffer: &DeltaBuffer,
        target: &FlushTarget,
    ) -> Result<FlushReport, Error> {
        self.flush_inner(buffer, target, None).await
    }

    /// Flush a single table, leaving the rest of the buffer in place
    pub async fn flush_table(
        &self,
        buffer: &DeltaBuffer,
        target: &FlushTarget,
        table: &str,
    ) -> Result<FlushReport, Error> {
        self.flush_inner(buffer, target, Some(table)).await
    }

    async fn flush_inner(
        &self,
        buffer: &DeltaBuffer,
        target: &FlushTarget,
        table: Option<&str>,
    ) -> Result<FlushReport, Error> {
        let _guard = FlushGuard::acquire(&self.flushing).map_err(Error::from)?;

        let batch = match table {
            Some(t) => buffer.drain_table(t),
            None => buffer.drain(),
        };
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }
        let drained = batch.deltas.len();

        let report = match target {
            FlushTarget::Database(adapter) => {
                if let Err(err) = adapter.insert_deltas(&batch.deltas).await {
                    Metrics::global().flush.flush_failures.inc();
                    buffer.restore(batch);
                    return Err(Error::Flush(FlushError::Adapter(err)));
                }
                FlushReport {
                    deltas_flushed: drained,
                    bytes_written: 0,
                    object_key: None,
                }
            }
            FlushTarget::ObjectStore(store) => {
                match self.flush_to_object_store(store.as_ref(), &batch, table).await {
                    Ok(report) => report,
                    Err(err) => {
                        Metrics::global().flush.flush_failures.inc();
                        buffer.restore(batch);
                        return Err(err);
                    }
                }
            }
        };

        Metrics::global().flush.flushes_total.inc();
        Metrics::global().flush.flush_bytes.inc_by(report.bytes_written as u64);
        Metrics::global()
            .ingest
            .buffer_bytes
            .set(buffer.estimated_bytes() as i64);

        if let Some(queue) = &self.flush_queue {
            let ctx = FlushContext {
                gateway_id: self.gateway_id.clone(),
                schemas: self.table_schema.iter().cloned().collect(),
            };
            // Materialisation is best-effort; a failing queue never fails
            // the flush.
            if let Err(err) = queue.publish(&batch.deltas, &ctx).await {
                tracing::warn!(gateway_id = %self.gateway_id, "flush queue publish failed: {err}");
            }
        }

        tracing::info!(
            gateway_id = %self.gateway_id,
            deltas = report.deltas_flushed,
            bytes = report.bytes_written,
            key = report.object_key.as_deref().unwrap_or("-"),
            "flush complete"
        );
        Ok(report)
    }

    async fn flush_to_object_store(
        &self,
        store: &dyn ObjectStore,
        batch: &DrainedBatch,
        table: Option<&str>,
    ) -> Result<FlushReport, Error> {
        let Some(range) = HlcRange::over(batch.deltas.iter().map(|d| d.as_ref())) else {
            return Ok(FlushReport::default());
        };

        let (bytes, content_type, extension) = match self.format {
            FlushFormat::Json => {
                let envelope = FlushEnvelope {
                    version: FLUSH_ENVELOPE_VERSION,
                    gateway_id: self.gateway_id.clone(),
                    created_at: Utc::now(),
                    hlc_range: range,
                    delta_count: batch.deltas.len(),
                    byte_size: batch.estimated_bytes,
                    deltas: batch.deltas.iter().map(|d| (**d).clone()).collect(),
                };
                let body = serde_json::to_vec(&envelope)
                    .map_err(|e| Error::Flush(FlushError::Serialize(e.to_string())))?;
                (Bytes::from(body), CONTENT_TYPE_JSON, "json")
            }
            FlushFormat::Parquet => {
                let codec = self
                    .parquet
                    .as_ref()
                    .ok_or(Error::Flush(FlushError::MissingCodec))?;
                let schema =
                    self.table_schema.as_ref().ok_or(Error::Flush(FlushError::MissingSchema))?;
                let body = codec
                    .write_deltas(&batch.deltas, Some(schema))
                    .map_err(|e| Error::Flush(FlushError::Serialize(e.0)))?;
                (body, CONTENT_TYPE_PARQUET, "parquet")
            }
        };

        let date = Utc::now().format("%Y-%m-%d");
        let prefix = self.key_prefix.as_deref().unwrap_or("");
        let table_part = table.map(|t| format!("{t}-")).unwrap_or_default();
        let key = format!(
            "deltas/{date}/{gateway}/{prefix}{table_part}{min}-{max}.{extension}",
            gateway = self.gateway_id,
            min = range.min,
            max = range.max,
        );

        let size = bytes.len();
        store
            .put_object(&key, bytes, content_type)
            .await
            .map_err(|e| Error::Flush(FlushError::Adapter(e)))?;

        if self.format == FlushFormat::Parquet {
            let file = DataFile {
                path: key.clone(),
                size_bytes: size as u64,
                record_count: batch.deltas.len() as u64,
            };
            let catalogue_table = table
                .map(String::from)
                .or_else(|| self.table_schema.as_ref().map(|s| s.table.clone()));
            if let Some(name) = catalogue_table {
                self.commit_to_catalogue(&name, file).await;
            }
        }

        Ok(FlushReport {
            deltas_flushed: batch.deltas.len(),
            bytes_written: size,
            object_key: Some(key),
        })
    }

    // Best-effort: a 409 on create_table means it already exists; a 409 on
    // append_files gets exactly one retry; everything else is logged and
    // swallowed.
    async fn commit_to_catalogue(&self, table: &str, file: DataFile) {
        let Some(catalogue) = &self.catalogue else { return };
        let Some(schema) = &self.table_schema else { return };
        let namespace = &self.catalogue_namespace;

        if let Err(err) = catalogue.create_namespace(namespace).await {
            tracing::warn!(table, "catalogue create_namespace failed: {err}");
        }

        match catalogue.create_table(namespace, table, schema, &[]).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {}
            Err(err) => {
                tracing::warn!(table, "catalogue create_table failed: {err}");
                return;
            }
        }

        match catalogue.append_files(namespace, table, std::slice::from_ref(&file)).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                if let Err(retry_err) =
                    catalogue.append_files(namespace, table, std::slice::from_ref(&file)).await
                {
                    tracing::warn!(table, "catalogue append_files retry failed: {retry_err}");
                }
            }
            Err(err) => {
                tracing::warn!(table, "catalogue append_files failed: {err}");
            }
        }
    }
}
