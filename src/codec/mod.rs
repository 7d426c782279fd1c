//! External codec contracts
//!
//! Parquet and protobuf encoding live outside the core; the gateway only
//! sees these capability traits. Flush, compaction and checkpointing all
//! delegate serialisation through them, so a deployment wires in whatever
//! concrete encoder its lakehouse expects.

use crate::core::error::CodecError;
use crate::types::{RowDelta, SyncResponse, TableSchema};
use bytes::Bytes;
use std::sync::Arc;

/// Parquet encode/decode capability
pub trait ParquetCodec: Send + Sync {
    /// Encode a delta batch as one parquet file. The schema, when present,
    /// fixes the column set and order.
    fn write_deltas(
        &self,
        deltas: &[Arc<RowDelta>],
        schema: Option<&TableSchema>,
    ) -> Result<Bytes, CodecError>;

    /// Decode one parquet file back into deltas
    fn read_deltas(&self, bytes: &[u8]) -> Result<Vec<RowDelta>, CodecError>;
}

/// Protobuf sync-response capability, used for checkpoint chunks
pub trait SyncCodec: Send + Sync {
    /// Encode a sync response page
    fn encode_sync_response(&self, response: &SyncResponse) -> Result<Bytes, CodecError>;

    /// Decode a sync response page
    fn decode_sync_response(&self, bytes: &[u8]) -> Result<SyncResponse, CodecError>;
}
