//! lakesync - Sync Gateway and Lakehouse Compactor
//!
//! lakesync is the server-side core of a CRDT-style replicated data layer:
//! clients push row-level deltas tagged with hybrid logical clocks; the
//! gateway validates, deduplicates and conflict-resolves them with
//! column-level Last-Writer-Wins, buffers them in memory and periodically
//! persists them to an object store as immutable files. A background
//! compactor merges accumulated delta files into base snapshots plus
//! equality-delete files and generates chunked checkpoints for client
//! bootstrap.
#![warn(missing_docs)]

// Configure global allocator for maximum performance
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

// Core foundational modules
pub mod core;
pub mod types;

// Main functional modules
pub mod codec;
pub mod flush;
pub mod lake;
pub mod schema;
pub mod storage;
pub mod sync;
pub mod system;

#[cfg(test)]
mod testutil;

// Re-export commonly used items for convenience
pub use crate::core::{Config, Error, GatewayConfig, Result, SyncGateway};
pub use crate::types::{HlcClock, HlcTimestamp, RowDelta, Value};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize the gateway runtime with tracing and metrics
pub fn init() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Initializing {} v{}", NAME, VERSION);

    // Initialize metrics registry
    system::metrics::init_registry();

    Ok(())
}
