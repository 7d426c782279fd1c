//! Shared test fixtures: JSON-backed stand-ins for the external parquet and
//! protobuf codecs, scripted object stores and delta builders.

use crate::core::error::{AdapterError, CodecError};
use crate::codec::{ParquetCodec, SyncCodec};
use crate::storage::adapters::{ObjectMeta, ObjectStore};
use crate::storage::memory::MemoryStore;
use crate::types::{
    ColumnValue, DeltaOp, HlcTimestamp, RowDelta, SyncResponse, TableSchema, Value,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Build a delta with fingerprint set
pub fn make_delta(
    op: DeltaOp,
    table: &str,
    row: &str,
    client: &str,
    hlc: u64,
    columns: &[(&str, Value)],
) -> RowDelta {
    RowDelta {
        op,
        table: table.into(),
        row_id: row.into(),
        client_id: client.into(),
        columns: columns
            .iter()
            .map(|(name, value)| ColumnValue { column: (*name).into(), value: value.clone() })
            .collect(),
        hlc: HlcTimestamp::from_u64(hlc),
        delta_id: String::new(),
    }
    .with_fingerprint()
}

/// Insert fixture with a single string column
pub fn insert(table: &str, row: &str, hlc: u64, column: &str, value: &str) -> RowDelta {
    make_delta(
        DeltaOp::Insert,
        table,
        row,
        "client-a",
        hlc,
        &[(column, Value::Str(value.into()))],
    )
}

/// Fake parquet codec that round-trips deltas as a JSON array
#[derive(Debug, Default)]
pub struct JsonParquetCodec;

impl ParquetCodec for JsonParquetCodec {
    fn write_deltas(
        &self,
        deltas: &[Arc<RowDelta>],
        _schema: Option<&TableSchema>,
    ) -> Result<Bytes, CodecError> {
        let owned: Vec<&RowDelta> = deltas.iter().map(|d| d.as_ref()).collect();
        serde_json::to_vec(&owned)
            .map(Bytes::from)
            .map_err(|e| CodecError::new(e.to_string()))
    }

    fn read_deltas(&self, bytes: &[u8]) -> Result<Vec<RowDelta>, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::new(e.to_string()))
    }
}

/// Fake protobuf codec that round-trips sync responses as JSON
#[derive(Debug, Default)]
pub struct JsonSyncCodec;

impl SyncCodec for JsonSyncCodec {
    fn encode_sync_response(&self, response: &SyncResponse) -> Result<Bytes, CodecError> {
        serde_json::to_vec(response)
            .map(Bytes::from)
            .map_err(|e| CodecError::new(e.to_string()))
    }

    fn decode_sync_response(&self, bytes: &[u8]) -> Result<SyncResponse, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::new(e.to_string()))
    }
}

/// Object store whose puts always fail; reads delegate to an inner store
#[derive(Default)]
pub struct FailingPutStore {
    inner: MemoryStore,
    attempts: AtomicUsize,
}

impl FailingPutStore {
    /// Create an empty failing store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of put attempts observed
    pub fn put_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FailingPutStore {
    async fn put_object(
        &self,
        _key: &str,
        _bytes: Bytes,
        _content_type: &str,
    ) -> Result<(), AdapterError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AdapterError::Backend("injected put failure".into()))
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, AdapterError> {
        self.inner.get_object(key).await
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta, AdapterError> {
        self.inner.head_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, AdapterError> {
        self.inner.list_objects(prefix).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), AdapterError> {
        self.inner.delete_object(key).await
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<(), AdapterError> {
        self.inner.delete_objects(keys).await
    }
}

/// Object store whose puts block until released; used to overlap flushes
pub struct BlockingPutStore {
    inner: MemoryStore,
    release: Notify,
    puts: AtomicUsize,
    entered: Notify,
}

impl Default for BlockingPutStore {
    fn default() -> Self {
        Self {
            inner: MemoryStore::new(),
            release: Notify::new(),
            puts: AtomicUsize::new(0),
            entered: Notify::new(),
        }
    }
}

impl BlockingPutStore {
    /// Create an empty blocking store
    pub fn new() -> Self {
        Self::default()
    }

    /// Unblock one pending put
    pub fn release_put(&self) {
        self.release.notify_one();
    }

    /// Wait until a put has entered and is blocked
    pub async fn wait_for_put(&self) {
        self.entered.notified().await;
    }

    /// Number of completed puts
    pub fn completed_puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for BlockingPutStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), AdapterError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_object(key, bytes, content_type).await
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, AdapterError> {
        self.inner.get_object(key).await
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta, AdapterError> {
        self.inner.head_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, AdapterError> {
        self.inner.list_objects(prefix).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), AdapterError> {
        self.inner.delete_object(key).await
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<(), AdapterError> {
        self.inner.delete_objects(keys).await
    }
}
