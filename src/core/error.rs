//! Error types and handling for the lakesync gateway
//!
//! This module defines all error types used throughout the system,
//! optimized for zero-cost error propagation and clear diagnostics.
//! Each domain error maps to the HTTP status the transport layer is
//! expected to surface.

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the lakesync gateway
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input or size bounds exceeded
    #[error("Validation error: {0}")]
    Validation(String),

    /// Client identity mismatch
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Schema whitelist or evolution failure
    #[error("Schema mismatch: {0}")]
    Schema(#[from] SchemaError),

    /// Remote HLC too far ahead of local wall clock
    #[error("Clock drift: remote wall {remote_wall_ms}ms exceeds local wall {local_wall_ms}ms by more than {max_drift_ms}ms")]
    ClockDrift {
        /// Wall-clock milliseconds carried by the remote timestamp
        remote_wall_ms: u64,
        /// Local wall-clock milliseconds at receipt
        local_wall_ms: u64,
        /// The configured drift bound
        max_drift_ms: u64,
    },

    /// Buffer beyond its backpressure bound; the push is rejected whole
    #[error("Backpressure: buffer holds {buffered_bytes} bytes (limit {limit_bytes})")]
    Backpressure {
        /// Estimated bytes currently buffered
        buffered_bytes: usize,
        /// The configured backpressure bound
        limit_bytes: usize,
    },

    /// Named source adapter is not registered
    #[error("Adapter not found: {0}")]
    AdapterNotFound(String),

    /// Object-store or database I/O failure
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Flush pipeline failure; drained entries are restored to the buffer
    #[error("Flush error: {0}")]
    Flush(#[from] FlushError),

    /// Compaction failure
    #[error("Compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Checkpoint generation failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Catalogue commit failure (best-effort; normally logged, not raised)
    #[error("Catalogue error: {0}")]
    Catalogue(#[from] CatalogueError),

    /// Structurally invalid action; fails the whole action batch
    #[error("Action validation error: {0}")]
    ActionValidation(String),

    /// Scheduler lifecycle violation
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Schema whitelist and evolution errors
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Column is not in the schema whitelist
    #[error("unknown column '{column}' for table '{table}'")]
    UnknownColumn {
        /// Table the delta targets
        table: String,
        /// The offending column name
        column: String,
    },

    /// Identifier fails the safe-identifier rule
    #[error("unsafe identifier '{0}'")]
    UnsafeIdentifier(String),

    /// Evolution targets a different table
    #[error("schema table mismatch: expected '{expected}', got '{actual}'")]
    TableMismatch {
        /// Table of the current schema
        expected: String,
        /// Table of the proposed schema
        actual: String,
    },

    /// Evolution drops an existing column
    #[error("schema evolution removed column '{0}'")]
    ColumnRemoved(String),

    /// Evolution changes an existing column's type
    #[error("schema evolution changed type of column '{column}': {from} -> {to}")]
    TypeChanged {
        /// The column whose type changed
        column: String,
        /// Existing type
        from: String,
        /// Proposed type
        to: String,
    },
}

/// Object-store and database adapter errors
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Object or row not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend rejected or failed the request
    #[error("backend error: {0}")]
    Backend(String),

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    /// I/O failure in the adapter
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Flush pipeline errors
#[derive(Error, Debug)]
pub enum FlushError {
    /// A flush is already running on this gateway
    #[error("flush already in progress")]
    InProgress,

    /// Parquet flush requires a table schema
    #[error("parquet flush requires a table schema")]
    MissingSchema,

    /// Parquet flush requires a configured codec
    #[error("parquet flush requires a parquet codec")]
    MissingCodec,

    /// Envelope or payload serialization failed
    #[error("flush serialization failed: {0}")]
    Serialize(String),

    /// Persisting the flushed file failed; the buffer was restored
    #[error("flush persist failed: {0}")]
    Adapter(#[from] AdapterError),
}

/// Compaction errors, by pipeline stage
#[derive(Error, Debug)]
pub enum CompactionError {
    /// Reading a delta file from the object store failed
    #[error("compaction read failed for '{key}': {source}")]
    Read {
        /// Key of the unreadable delta file
        key: String,
        /// Underlying adapter failure
        #[source]
        source: AdapterError,
    },

    /// Decoding a delta file failed
    #[error("compaction parse failed for '{key}': {message}")]
    Parse {
        /// Key of the undecodable delta file
        key: String,
        /// Codec diagnostic
        message: String,
    },

    /// Encoding an output file failed
    #[error("compaction write failed: {0}")]
    Write(String),

    /// Persisting an output file failed
    #[error("compaction store failed: {0}")]
    Store(#[source] AdapterError),
}

/// Checkpoint generation errors, by pipeline stage
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Reading a base file failed
    #[error("checkpoint read failed for '{key}': {source}")]
    Read {
        /// Key of the unreadable base file
        key: String,
        /// Underlying adapter failure
        #[source]
        source: AdapterError,
    },

    /// Decoding a base file failed
    #[error("checkpoint parse failed for '{key}': {message}")]
    Parse {
        /// Key of the undecodable base file
        key: String,
        /// Codec diagnostic
        message: String,
    },

    /// Encoding a chunk failed
    #[error("checkpoint encode failed: {0}")]
    Encode(String),

    /// Persisting a chunk or the manifest failed
    #[error("checkpoint write failed: {0}")]
    Write(#[source] AdapterError),
}

/// Catalogue commit failure carrying the backend status code
#[derive(Error, Debug)]
#[error("catalogue call failed with status {status_code}: {message}")]
pub struct CatalogueError {
    /// HTTP-like status from the catalogue backend
    pub status_code: u16,
    /// Backend diagnostic
    pub message: String,
}

impl CatalogueError {
    /// True when the backend reported a conflict (409)
    pub fn is_conflict(&self) -> bool {
        self.status_code == 409
    }
}

/// External codec (parquet / protobuf) failure
#[derive(Error, Debug)]
#[error("codec error: {0}")]
pub struct CodecError(pub String);

impl CodecError {
    /// Build a codec error from any displayable source
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Action handler execution failure
#[derive(Error, Debug)]
#[error("action execution failed: {message}")]
pub struct ActionExecutionError {
    /// Handler diagnostic
    pub message: String,
    /// Whether a retry may succeed; retryable failures are never cached
    pub retryable: bool,
}

impl ActionExecutionError {
    /// A failure worth retrying (never cached)
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    /// A permanent failure (cached so retries short-circuit)
    pub fn permanent(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }
}

/// Materialiser failure, reported per table and never fatal to a flush
#[derive(Error, Debug)]
#[error("materialise failed: {0}")]
pub struct MaterialiseError(pub String);

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// The HTTP status the transport should surface for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::ActionValidation(_) => 400,
            Error::Forbidden(_) => 403,
            Error::AdapterNotFound(_) => 404,
            Error::ClockDrift { .. } => 409,
            Error::Schema(_) => 422,
            Error::Backpressure { .. } => 503,
            Error::Adapter(_) | Error::Catalogue(_) => 502,
            _ => 500,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Backpressure { .. }
                | Error::Adapter(AdapterError::Timeout)
                | Error::Adapter(AdapterError::Io(_))
                | Error::Flush(FlushError::InProgress)
                | Error::Flush(FlushError::Adapter(_))
        )
    }

    /// Check if this is a client error (4xx equivalent)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx equivalent)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}
