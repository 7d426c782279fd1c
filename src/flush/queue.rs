//! Post-flush materialisation dispatch
//!
//! After a successful flush the drained entries are offered to downstream
//! materialisers. The memory queue invokes them in-process; the
//! object-store queue writes a job file for an external polling consumer.
//! Publication is always best-effort: materialisation failures are logged
//! and reported through the failure hook, never back to the flush.

use crate::core::error::{Error, MaterialiseError};
use crate::storage::adapters::{ObjectStore, CONTENT_TYPE_JSON};
use crate::types::{RowDelta, TableSchema};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Context handed to materialisers alongside the entries
#[derive(Debug, Clone)]
pub struct FlushContext {
    /// Gateway that produced the flush
    pub gateway_id: String,
    /// Table schemas known to the gateway
    pub schemas: Vec<TableSchema>,
}

/// Post-flush publication capability
#[async_trait]
pub trait FlushQueue: Send + Sync {
    /// Offer a flushed batch downstream
    async fn publish(&self, entries: &[Arc<RowDelta>], ctx: &FlushContext) -> Result<(), Error>;
}

/// A downstream consumer of flushed entries
pub trait Materialiser: Send + Sync {
    /// Apply a batch of entries for one table
    fn materialise(
        &self,
        entries: &[Arc<RowDelta>],
        schemas: &[TableSchema],
    ) -> Result<(), MaterialiseError>;
}

/// Callback invoked per failing table: `(table, entry_count, error)`
pub type FailureHook = Box<dyn Fn(&str, usize, &MaterialiseError) + Send + Sync>;

/// In-process queue: synchronously drives a materialiser list
#[derive(Default)]
pub struct MemoryFlushQueue {
    materialisers: Vec<Arc<dyn Materialiser>>,
    on_failure: Option<FailureHook>,
}

impl MemoryFlushQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a materialiser
    pub fn with_materialiser(mut self, materialiser: Arc<dyn Materialiser>) -> Self {
        self.materialisers.push(materialiser);
        self
    }

    /// Install the per-table failure callback
    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }
}

#[async_trait]
impl FlushQueue for MemoryFlushQueue {
    async fn publish(&self, entries: &[Arc<RowDelta>], ctx: &FlushContext) -> Result<(), Error> {
        if entries.is_empty() {
            return Ok(());
        }

        // Materialisers run per table so one bad table cannot poison the
        // rest of the batch.
        let mut by_table: BTreeMap<&str, Vec<Arc<RowDelta>>> = BTreeMap::new();
        for entry in entries {
            by_table.entry(entry.table.as_str()).or_default().push(Arc::clone(entry));
        }

        for (table, group) in by_table {
            for materialiser in &self.materialisers {
                if let Err(err) = materialiser.materialise(&group, &ctx.schemas) {
                    tracing::warn!(
                        gateway_id = %ctx.gateway_id,
                        table,
                        entries = group.len(),
                        "materialiser failed: {err}"
                    );
                    if let Some(hook) = &self.on_failure {
                        hook(table, group.len(), &err);
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MaterialiseJob<'a> {
    entries: Vec<&'a RowDelta>,
    schemas: &'a [TableSchema],
}

/// Object-store queue: writes one job file per flush under
/// `materialise-jobs/{gatewayId}/`; an external consumer polls, applies and
/// deletes.
pub struct ObjectStoreFlushQueue {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreFlushQueue {
    /// Create a queue over an object store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FlushQueue for ObjectStoreFlushQueue {
    async fn publish(&self, entries: &[Arc<RowDelta>], ctx: &FlushContext) -> Result<(), Error> {
        if entries.is_empty() {
            return Ok(());
        }

        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let nonce: u128 = rand::rng().random();
        let key = format!("materialise-jobs/{}/{unix_ms}-{nonce:032x}.json", ctx.gateway_id);

        let job = MaterialiseJob {
            entries: entries.iter().map(|e| e.as_ref()).collect(),
            schemas: &ctx.schemas,
        };
        let body = serde_json::to_vec(&job)?;
        self.store.put_object(&key, Bytes::from(body), CONTENT_TYPE_JSON).await?;

        tracing::debug!(key, entries = entries.len(), "materialise job published");
        Ok(())
    }
}
