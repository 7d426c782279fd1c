//! Storage layer: delta buffer, adapter contracts and registries

/// External adapter capability traits
pub mod adapters;
/// In-memory delta buffer
pub mod buffer;
/// In-memory object store
pub mod memory;
/// Named source adapter registry
pub mod registry;

pub use adapters::{
    Catalogue, DataFile, DatabaseAdapter, ObjectMeta, ObjectStore, CONTENT_TYPE_JSON,
    CONTENT_TYPE_OCTET_STREAM, CONTENT_TYPE_PARQUET,
};
pub use buffer::{BufferSnapshot, DeltaBuffer, DrainedBatch, TableStats};
pub use memory::MemoryStore;
pub use registry::SourceRegistry;
