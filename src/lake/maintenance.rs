//! Maintenance runner
//!
//! One maintenance cycle compacts accumulated delta files, regenerates the
//! checkpoint when new base files appeared, and sweeps orphaned objects.
//! Checkpoint failure is logged and never fails the cycle; an object is
//! swept only when it is both unreferenced and older than the configured
//! age, which keeps in-flight flushes safe from the sweeper.

use crate::core::config::MaintenanceConfig;
use crate::core::error::Error;
use crate::lake::checkpoint::CheckpointGenerator;
use crate::lake::compactor::{CompactionReport, Compactor};
use crate::storage::adapters::ObjectStore;
use crate::system::metrics::Metrics;
use crate::types::{CheckpointManifest, HlcTimestamp};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Work for one maintenance cycle, supplied by the scheduler's task provider
#[derive(Debug, Clone)]
pub struct MaintenanceTask {
    /// Flushed delta files eligible for compaction, oldest first
    pub delta_file_keys: Vec<String>,
    /// Prefix for compaction outputs
    pub output_prefix: String,
    /// Prefix swept for orphans
    pub storage_prefix: String,
}

/// Outcome of one maintenance cycle
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    /// Compaction counters
    pub compaction: CompactionReport,
    /// Snapshots expired this cycle (reserved; snapshot retention is
    /// catalogue-side)
    pub snapshots_expired: usize,
    /// Objects removed by the orphan sweep
    pub orphans_removed: usize,
    /// Manifest of the checkpoint generated this cycle, if any
    pub checkpoint: Option<CheckpointManifest>,
}

/// One maintenance cycle; the seam the scheduler drives
#[async_trait]
pub trait MaintenanceJob: Send + Sync {
    /// Run a full cycle
    async fn run(&self, task: &MaintenanceTask) -> Result<MaintenanceReport, Error>;
}

/// Compact → checkpoint → orphan-sweep orchestration
pub struct MaintenanceRunner {
    compactor: Compactor,
    checkpoint: Option<CheckpointGenerator>,
    store: Arc<dyn ObjectStore>,
    config: MaintenanceConfig,
}

impl MaintenanceRunner {
    /// Create a runner over a store and compactor
    pub fn new(
        compactor: Compactor,
        store: Arc<dyn ObjectStore>,
        config: MaintenanceConfig,
    ) -> Self {
        Self { compactor, checkpoint: None, store, config }
    }

    /// Enable checkpoint generation after compaction
    pub fn with_checkpoint_generator(mut self, generator: CheckpointGenerator) -> Self {
        self.checkpoint = Some(generator);
        self
    }

    fn wall_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Delete every object under `prefix` that is neither referenced by
    /// `active_keys` nor younger than `orphan_age_ms`. Returns the number
    /// of objects removed.
    pub async fn remove_orphans(
        &self,
        prefix: &str,
        active_keys: &HashSet<String>,
    ) -> Result<usize, Error> {
        let now_ms = Self::wall_ms();
        let listed = self.store.list_objects(prefix).await?;
        let doomed: Vec<String> = listed
            .into_iter()
            .filter(|meta| {
                !active_keys.contains(&meta.key)
                    && now_ms.saturating_sub(meta.last_modified_ms) >= self.config.orphan_age_ms
            })
            .map(|meta| meta.key)
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }
        self.store.delete_objects(&doomed).await?;
        Metrics::global().maintenance.orphans_removed.inc_by(doomed.len() as u64);
        tracing::info!(prefix, removed = doomed.len(), "orphan sweep complete");
        Ok(doomed.len())
    }
}

#[async_trait]
impl MaintenanceJob for MaintenanceRunner {
    async fn run(&self, task: &MaintenanceTask) -> Result<MaintenanceReport, Error> {
        let compaction = self
            .compactor
            .compact(&task.delta_file_keys, &task.output_prefix)
            .await
            .map_err(Error::Compaction)?;

        // Everything still referenced after this cycle: delta files the
        // compactor did not consume plus every compaction output.
        let mut active_keys: HashSet<String> = task
            .delta_file_keys
            .iter()
            .skip(compaction.delta_files_compacted)
            .cloned()
            .collect();
        let outputs = self.store.list_objects(&task.output_prefix).await?;
        active_keys.extend(outputs.iter().map(|meta| meta.key.clone()));

        let checkpoint = match (&self.checkpoint, compaction.base_files_written > 0) {
            (Some(generator), true) => {
                let base_keys: Vec<String> = outputs
                    .iter()
                    .map(|meta| meta.key.clone())
                    .filter(|key| key.ends_with(".parquet") && key.contains("/base-"))
                    .collect();
                let snapshot_hlc = HlcTimestamp::encode(Self::wall_ms(), 0);
                match generator.generate(&base_keys, snapshot_hlc).await {
                    Ok(manifest) => {
                        active_keys.extend(generator.checkpoint_keys(manifest.chunk_count));
                        Some(manifest)
                    }
                    Err(err) => {
                        // The cycle still sweeps and reports; a checkpoint
                        // can be regenerated next round.
                        tracing::warn!("checkpoint generation failed: {err}");
                        None
                    }
                }
            }
            _ => None,
        };

        let orphans_removed = self.remove_orphans(&task.storage_prefix, &active_keys).await?;

        Ok(MaintenanceReport {
            compaction,
            snapshots_expired: 0,
            orphans_removed,
            checkpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CheckpointConfig, CompactionConfig};
    use crate::storage::adapters::CONTENT_TYPE_PARQUET;
    use crate::storage::memory::MemoryStore;
    use crate::testutil::{make_delta, JsonParquetCodec, JsonSyncCodec};
    use crate::types::{DeltaOp, RowDelta, Value};
    use bytes::Bytes;

    fn maintenance_config(orphan_age_ms: u64) -> MaintenanceConfig {
        MaintenanceConfig { retain_snapshots: 5, orphan_age_ms }
    }

    fn compactor(store: &Arc<MemoryStore>, min: usize) -> Compactor {
        Compactor::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            Arc::new(JsonParquetCodec),
            CompactionConfig {
                min_delta_files: min,
                max_delta_files: 20,
                target_file_size_bytes: 128 * 1024 * 1024,
            },
        )
    }

    fn generator(store: &Arc<MemoryStore>) -> CheckpointGenerator {
        CheckpointGenerator::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            Arc::new(JsonParquetCodec),
            Arc::new(JsonSyncCodec),
            "gw-1",
            CheckpointConfig { chunk_bytes: 16 * 1024 * 1024 },
        )
    }

    async fn write_delta_file(store: &MemoryStore, key: &str, deltas: &[RowDelta]) {
        let refs: Vec<&RowDelta> = deltas.iter().collect();
        store
            .put_object(key, Bytes::from(serde_json::to_vec(&refs).unwrap()), CONTENT_TYPE_PARQUET)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn orphan_sweep_respects_active_keys_and_age() {
        let store = Arc::new(MemoryStore::new());
        for key in ["p/active.bin", "p/old.bin", "p/young.bin"] {
            store.put_object(key, Bytes::from_static(b"x"), "application/octet-stream").await.unwrap();
        }
        // active.bin is ancient but referenced; old.bin is 2h old; young.bin
        // was written just now.
        store.age_object("p/active.bin", 7_200_000);
        store.age_object("p/old.bin", 7_200_000);

        let runner = MaintenanceRunner::new(
            compactor(&store, 10),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            maintenance_config(3_600_000),
        );
        let active: HashSet<String> = ["p/active.bin".to_string()].into_iter().collect();
        let removed = runner.remove_orphans("p/", &active).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.get_object("p/active.bin").await.is_ok());
        assert!(store.get_object("p/young.bin").await.is_ok());
        assert!(store.get_object("p/old.bin").await.is_err());
    }

    #[tokio::test]
    async fn full_cycle_compacts_checkpoints_and_sweeps() {
        let store = Arc::new(MemoryStore::new());
        let deltas = [
            make_delta(DeltaOp::Insert, "t", "r1", "a", 10, &[("v", Value::Int(1))]),
            make_delta(DeltaOp::Insert, "t", "r2", "a", 20, &[("v", Value::Int(2))]),
        ];
        write_delta_file(&store, "lake/deltas/f1.parquet", &deltas[..1]).await;
        write_delta_file(&store, "lake/deltas/f2.parquet", &deltas[1..]).await;
        // A stale file no longer referenced by anything.
        store
            .put_object("lake/stale.parquet", Bytes::from_static(b"[]"), CONTENT_TYPE_PARQUET)
            .await
            .unwrap();
        store.age_object("lake/stale.parquet", 7_200_000);
        // Consumed delta files are also old; they become orphans this cycle.
        store.age_object("lake/deltas/f1.parquet", 7_200_000);
        store.age_object("lake/deltas/f2.parquet", 7_200_000);

        let runner = MaintenanceRunner::new(
            compactor(&store, 2),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            maintenance_config(3_600_000),
        )
        .with_checkpoint_generator(generator(&store));

        let task = MaintenanceTask {
            delta_file_keys: vec![
                "lake/deltas/f1.parquet".to_string(),
                "lake/deltas/f2.parquet".to_string(),
            ],
            output_prefix: "lake/compacted".to_string(),
            storage_prefix: "lake/".to_string(),
        };
        let report = runner.run(&task).await.unwrap();

        assert_eq!(report.compaction.base_files_written, 1);
        let manifest = report.checkpoint.expect("checkpoint generated");
        assert_eq!(manifest.total_deltas, 2);
        assert_eq!(report.orphans_removed, 3, "stale file and both consumed inputs swept");

        // Outputs and checkpoint survive the sweep.
        assert!(!store.list_objects("lake/compacted/").await.unwrap().is_empty());
        assert!(store.get_object("checkpoints/gw-1/manifest.json").await.is_ok());
        assert!(store.get_object("lake/stale.parquet").await.is_err());
    }

    #[tokio::test]
    async fn unconsumed_delta_files_stay_active() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            write_delta_file(
                &store,
                &format!("lake/deltas/f{i}.parquet"),
                &[make_delta(DeltaOp::Insert, "t", &format!("r{i}"), "a", 10 + i as u64, &[])],
            )
            .await;
            store.age_object(&format!("lake/deltas/f{i}.parquet"), 7_200_000);
        }

        // max_delta_files = 2 leaves f2 unconsumed.
        let compactor = Compactor::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::new(JsonParquetCodec),
            CompactionConfig {
                min_delta_files: 1,
                max_delta_files: 2,
                target_file_size_bytes: 128 * 1024 * 1024,
            },
        );
        let runner = MaintenanceRunner::new(
            compactor,
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            maintenance_config(3_600_000),
        );
        let task = MaintenanceTask {
            delta_file_keys: (0..3).map(|i| format!("lake/deltas/f{i}.parquet")).collect(),
            output_prefix: "lake/compacted".to_string(),
            storage_prefix: "lake/".to_string(),
        };
        let report = runner.run(&task).await.unwrap();

        assert_eq!(report.compaction.delta_files_compacted, 2);
        assert_eq!(report.orphans_removed, 2, "only the consumed inputs swept");
        assert!(store.get_object("lake/deltas/f2.parquet").await.is_ok());
    }

    #[tokio::test]
    async fn checkpoint_failure_is_non_fatal() {
        struct BrokenSyncCodec;
        impl crate::codec::SyncCodec for BrokenSyncCodec {
            fn encode_sync_response(
                &self,
                _response: &crate::types::SyncResponse,
            ) -> Result<Bytes, crate::core::error::CodecError> {
                Err(crate::core::error::CodecError::new("encoder offline"))
            }
            fn decode_sync_response(
                &self,
                _bytes: &[u8],
            ) -> Result<crate::types::SyncResponse, crate::core::error::CodecError> {
                Err(crate::core::error::CodecError::new("encoder offline"))
            }
        }

        let store = Arc::new(MemoryStore::new());
        write_delta_file(
            &store,
            "lake/deltas/f1.parquet",
            &[make_delta(DeltaOp::Insert, "t", "r1", "a", 10, &[("v", Value::Int(1))])],
        )
        .await;

        let broken_generator = CheckpointGenerator::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::new(JsonParquetCodec),
            Arc::new(BrokenSyncCodec),
            "gw-1",
            CheckpointConfig { chunk_bytes: 16 * 1024 * 1024 },
        );
        let runner = MaintenanceRunner::new(
            compactor(&store, 1),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            maintenance_config(3_600_000),
        )
        .with_checkpoint_generator(broken_generator);

        let task = MaintenanceTask {
            delta_file_keys: vec!["lake/deltas/f1.parquet".to_string()],
            output_prefix: "lake/compacted".to_string(),
            storage_prefix: "lake/".to_string(),
        };
        let report = runner.run(&task).await.unwrap();
        assert_eq!(report.compaction.base_files_written, 1);
        assert!(report.checkpoint.is_none(), "failure logged, cycle continues");
    }

    #[tokio::test]
    async fn no_checkpoint_without_new_base_files() {
        let store = Arc::new(MemoryStore::new());
        let runner = MaintenanceRunner::new(
            compactor(&store, 10),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            maintenance_config(3_600_000),
        )
        .with_checkpoint_generator(generator(&store));

        // Below min_delta_files: compaction is a no-op.
        let task = MaintenanceTask {
            delta_file_keys: vec!["lake/deltas/f1.parquet".to_string()],
            output_prefix: "lake/compacted".to_string(),
            storage_prefix: "lake/".to_string(),
        };
        let report = runner.run(&task).await.unwrap();
        assert_eq!(report.compaction, CompactionReport::default());
        assert!(report.checkpoint.is_none());
        assert!(store.get_object("checkpoints/gw-1/manifest.json").await.is_err());
    }
}
