//! Checkpoint generator
//!
//! Rolls consolidated base files into a chunked, byte-bounded snapshot a
//! fresh client can bootstrap from without replaying history. Chunks are
//! protobuf-encoded sync responses written alongside a JSON manifest.

use crate::codec::{ParquetCodec, SyncCodec};
use crate::core::config::CheckpointConfig;
use crate::core::error::CheckpointError;
use crate::storage::adapters::{ObjectStore, CONTENT_TYPE_JSON, CONTENT_TYPE_OCTET_STREAM};
use crate::system::metrics::Metrics;
use crate::types::{CheckpointManifest, HlcTimestamp, RowDelta, SyncResponse};
use chrono::Utc;
use std::sync::Arc;

// Per-delta contribution to the chunk size estimate, sized for the protobuf
// encoding rather than the parquet source.
const DELTA_BASE_ESTIMATE: usize = 200;
const COLUMN_ESTIMATE: usize = 50;

/// Chunked snapshot generation over base files
pub struct CheckpointGenerator {
    store: Arc<dyn ObjectStore>,
    parquet: Arc<dyn ParquetCodec>,
    sync_codec: Arc<dyn SyncCodec>,
    gateway_id: String,
    config: CheckpointConfig,
}

impl CheckpointGenerator {
    /// Create a generator for a gateway
    pub fn new(
        store: Arc<dyn ObjectStore>,
        parquet: Arc<dyn ParquetCodec>,
        sync_codec: Arc<dyn SyncCodec>,
        gateway_id: impl Into<String>,
        config: CheckpointConfig,
    ) -> Self {
        Self { store, parquet, sync_codec, gateway_id: gateway_id.into(), config }
    }

    fn manifest_key(&self) -> String {
        format!("checkpoints/{}/manifest.json", self.gateway_id)
    }

    fn chunk_key(&self, index: usize) -> String {
        format!("checkpoints/{}/chunk-{index:03}.bin", self.gateway_id)
    }

    /// Every key a checkpoint of `chunk_count` chunks occupies; used by
    /// maintenance to shield checkpoints from the orphan sweep
    pub fn checkpoint_keys(&self, chunk_count: usize) -> Vec<String> {
        let mut keys = vec![self.manifest_key()];
        keys.extend((0..chunk_count).map(|i| self.chunk_key(i)));
        keys
    }

    async fn flush_chunk(
        &self,
        index: usize,
        deltas: Vec<RowDelta>,
        snapshot_hlc: HlcTimestamp,
        has_more: bool,
    ) -> Result<String, CheckpointError> {
        let response = SyncResponse { deltas, server_hlc: snapshot_hlc, has_more };
        let bytes = self
            .sync_codec
            .encode_sync_response(&response)
            .map_err(|err| CheckpointError::Encode(err.0))?;
        let key = self.chunk_key(index);
        self.store
            .put_object(&key, bytes, CONTENT_TYPE_OCTET_STREAM)
            .await
            .map_err(CheckpointError::Write)?;
        Ok(key)
    }

    /// Read every base file, re-chunk its rows at the configured byte
    /// bound and write `chunk-NNN.bin` files plus `manifest.json`.
    pub async fn generate(
        &self,
        base_file_keys: &[String],
        snapshot_hlc: HlcTimestamp,
    ) -> Result<CheckpointManifest, CheckpointError> {
        let mut chunks: Vec<String> = Vec::new();
        let mut total_deltas = 0usize;
        let mut pending: Vec<RowDelta> = Vec::new();
        let mut pending_estimate = 0usize;

        for key in base_file_keys {
            let bytes = self.store.get_object(key).await.map_err(|source| {
                CheckpointError::Read { key: key.clone(), source }
            })?;
            let deltas = self.parquet.read_deltas(&bytes).map_err(|err| {
                CheckpointError::Parse { key: key.clone(), message: err.0 }
            })?;

            for delta in deltas {
                pending_estimate += DELTA_BASE_ESTIMATE + COLUMN_ESTIMATE * delta.columns.len();
                pending.push(delta);
                if pending_estimate >= self.config.chunk_bytes {
                    total_deltas += pending.len();
                    let chunk = self
                        .flush_chunk(chunks.len(), std::mem::take(&mut pending), snapshot_hlc, true)
                        .await?;
                    chunks.push(chunk);
                    pending_estimate = 0;
                }
            }
        }

        if !pending.is_empty() {
            total_deltas += pending.len();
            let chunk = self
                .flush_chunk(chunks.len(), std::mem::take(&mut pending), snapshot_hlc, false)
                .await?;
            chunks.push(chunk);
        }

        let manifest = CheckpointManifest {
            snapshot_hlc,
            generated_at: Utc::now(),
            chunk_count: chunks.len(),
            total_deltas,
            chunks,
        };
        let body = serde_json::to_vec(&manifest)
            .map_err(|err| CheckpointError::Encode(err.to_string()))?;
        self.store
            .put_object(&self.manifest_key(), bytes::Bytes::from(body), CONTENT_TYPE_JSON)
            .await
            .map_err(CheckpointError::Write)?;

        Metrics::global().maintenance.checkpoints_written.inc();
        Metrics::global()
            .maintenance
            .checkpoint_chunks
            .inc_by(manifest.chunk_count as u64);

        tracing::info!(
            gateway_id = %self.gateway_id,
            chunks = manifest.chunk_count,
            deltas = manifest.total_deltas,
            snapshot_hlc = %manifest.snapshot_hlc,
            "checkpoint generated"
        );
        Ok(manifest)
    }
}
