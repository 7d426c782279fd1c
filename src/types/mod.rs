//! Type definitions for the lakesync gateway
//!
//! This module contains the data model: hybrid logical clocks, row deltas,
//! column values, table schemas and the sync wire structures.

/// Hybrid logical clock
pub mod hlc;
/// Row delta records and wire structures
pub mod delta;
/// Table schema definitions
pub mod schema;
/// Column value representation
pub mod value;

pub use delta::{
    CheckpointManifest, ColumnValue, DeltaOp, FlushEnvelope, HlcRange, RowDelta, RowKey,
    SyncPull, SyncPush, SyncResponse, FLUSH_ENVELOPE_VERSION,
};
pub use hlc::{HlcClock, HlcTimestamp, MAX_DRIFT_MS};
pub use schema::{is_safe_identifier, ColumnDef, ColumnType, TableSchema};
pub use value::Value;
