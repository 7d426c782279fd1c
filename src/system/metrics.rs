//! Metrics collection and monitoring for the lakesync gateway
//!
//! High-performance metrics collection using Prometheus, optimized for
//! minimal overhead on the ingestion hot path.

use crate::core::error::Result;
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_gauge, IntCounter, IntGauge, Registry, TextEncoder,
};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Ingestion path counters
pub struct IngestMetrics {
    /// Deltas appended to the buffer
    pub deltas_ingested: IntCounter,
    /// Pushes skipped as idempotent replays
    pub deltas_deduplicated: IntCounter,
    /// Appends that LWW-merged an existing row
    pub deltas_merged: IntCounter,
    /// Pushes rejected (identity, size, backpressure)
    pub pushes_rejected: IntCounter,
    /// Estimated bytes currently buffered
    pub buffer_bytes: IntGauge,
}

/// Flush path counters
pub struct FlushMetrics {
    /// Successful flushes
    pub flushes_total: IntCounter,
    /// Flushes that failed and restored the buffer
    pub flush_failures: IntCounter,
    /// Payload bytes persisted by flushes
    pub flush_bytes: IntCounter,
}

/// Maintenance counters
pub struct MaintenanceMetrics {
    /// Compaction cycles that produced output
    pub compactions_total: IntCounter,
    /// Base files written by compaction
    pub base_files_written: IntCounter,
    /// Equality-delete files written by compaction
    pub delete_files_written: IntCounter,
    /// Objects removed by orphan sweeps
    pub orphans_removed: IntCounter,
    /// Checkpoints generated
    pub checkpoints_written: IntCounter,
    /// Checkpoint chunks written
    pub checkpoint_chunks: IntCounter,
}

/// Centralized metrics collection
pub struct Metrics {
    /// Ingestion path
    pub ingest: IngestMetrics,
    /// Flush path
    pub flush: FlushMetrics,
    /// Maintenance cycle
    pub maintenance: MaintenanceMetrics,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> Result<Self> {
        Ok(Self {
            ingest: IngestMetrics::new()?,
            flush: FlushMetrics::new()?,
            maintenance: MaintenanceMetrics::new()?,
        })
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> =
            Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
        &INSTANCE
    }

    /// Render the default registry in Prometheus text format
    pub fn render() -> Result<String> {
        let encoder = TextEncoder::new();
        let metrics = prometheus::gather();
        Ok(encoder.encode_to_string(&metrics)?)
    }
}

impl IngestMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            deltas_ingested: register_int_counter!(
                "ls_deltas_ingested_total",
                "Total number of deltas appended to the buffer"
            )?,
            deltas_deduplicated: register_int_counter!(
                "ls_deltas_deduplicated_total",
                "Total number of idempotent delta replays"
            )?,
            deltas_merged: register_int_counter!(
                "ls_deltas_merged_total",
                "Total number of LWW merges on ingest"
            )?,
            pushes_rejected: register_int_counter!(
                "ls_pushes_rejected_total",
                "Total number of rejected pushes"
            )?,
            buffer_bytes: register_int_gauge!(
                "ls_buffer_bytes",
                "Estimated bytes currently buffered"
            )?,
        })
    }
}

impl FlushMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            flushes_total: register_int_counter!(
                "ls_flushes_total",
                "Total number of successful flushes"
            )?,
            flush_failures: register_int_counter!(
                "ls_flush_failures_total",
                "Total number of failed flushes"
            )?,
            flush_bytes: register_int_counter!(
                "ls_flush_bytes_total",
                "Total payload bytes persisted by flushes"
            )?,
        })
    }
}

impl MaintenanceMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            compactions_total: register_int_counter!(
                "ls_compactions_total",
                "Total number of compaction cycles with output"
            )?,
            base_files_written: register_int_counter!(
                "ls_base_files_written_total",
                "Total number of base files written"
            )?,
            delete_files_written: register_int_counter!(
                "ls_delete_files_written_total",
                "Total number of equality-delete files written"
            )?,
            orphans_removed: register_int_counter!(
                "ls_orphans_removed_total",
                "Total number of objects removed by orphan sweeps"
            )?,
            checkpoints_written: register_int_counter!(
                "ls_checkpoints_written_total",
                "Total number of checkpoints generated"
            )?,
            checkpoint_chunks: register_int_counter!(
                "ls_checkpoint_chunks_total",
                "Total number of checkpoint chunks written"
            )?,
        })
    }
}

/// Initialize the metrics registry
pub fn init_registry() {
    Lazy::force(&REGISTRY);
    let _ = Metrics::global();
}
