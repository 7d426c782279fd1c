//! External adapter capability traits
//!
//! The gateway persists through injected adapters rather than concrete
//! drivers. Each adapter declares the capabilities it implements by
//! implementing the matching trait; consumers receive only the capability
//! view they need. Adapters return errors, never panic; retries live inside
//! the adapter, not here.

use crate::core::error::{AdapterError, CatalogueError};
use crate::types::{HlcTimestamp, RowDelta, TableSchema};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Metadata for one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full object key
    pub key: String,
    /// Payload size in bytes
    pub size: u64,
    /// Last-modified wall clock, milliseconds since the Unix epoch
    pub last_modified_ms: u64,
}

/// A data file handed to the catalogue on commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// Object key of the file
    pub path: String,
    /// Payload size in bytes
    pub size_bytes: u64,
    /// Number of records in the file
    pub record_count: u64,
}

/// Object-store capability: immutable blob storage with listing
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), AdapterError>;

    /// Fetch an object's payload
    async fn get_object(&self, key: &str) -> Result<Bytes, AdapterError>;

    /// Fetch an object's metadata
    async fn head_object(&self, key: &str) -> Result<ObjectMeta, AdapterError>;

    /// List objects under a key prefix
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, AdapterError>;

    /// Delete one object
    async fn delete_object(&self, key: &str) -> Result<(), AdapterError>;

    /// Delete a batch of objects in one call
    async fn delete_objects(&self, keys: &[String]) -> Result<(), AdapterError>;
}

/// Database capability: row-oriented persistence for deployments that flush
/// into a relational store instead of an object store
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Insert a drained batch of deltas
    async fn insert_deltas(&self, deltas: &[Arc<RowDelta>]) -> Result<(), AdapterError>;

    /// Stream deltas recorded after the given HLC
    async fn query_deltas_since(&self, hlc: HlcTimestamp) -> Result<Vec<RowDelta>, AdapterError>;

    /// Materialised latest row state for a table
    async fn get_latest_state(&self, table: &str) -> Result<Vec<RowDelta>, AdapterError>;

    /// Create or migrate backing storage for a table schema
    async fn ensure_schema(&self, schema: &TableSchema) -> Result<(), AdapterError>;

    /// Release connections
    async fn close(&self) -> Result<(), AdapterError>;
}

/// Catalogue capability: optional lakehouse table commits after parquet
/// flushes. All calls are best-effort from the gateway's perspective.
#[async_trait]
pub trait Catalogue: Send + Sync {
    /// Create a namespace; conflict-safe
    async fn create_namespace(&self, namespace: &[String]) -> Result<(), CatalogueError>;

    /// Create a table under a namespace
    async fn create_table(
        &self,
        namespace: &[String],
        name: &str,
        schema: &TableSchema,
        partition_by: &[String],
    ) -> Result<(), CatalogueError>;

    /// Register newly flushed data files on a table
    async fn append_files(
        &self,
        namespace: &[String],
        name: &str,
        files: &[DataFile],
    ) -> Result<(), CatalogueError>;
}

/// Content type for JSON flush envelopes and manifests
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type for parquet delta/base/delete files
pub const CONTENT_TYPE_PARQUET: &str = "application/vnd.apache.parquet";
/// Content type for protobuf checkpoint chunks
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
