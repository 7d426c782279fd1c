//! Durable flush: coordinator and post-flush materialisation queue

/// Flush coordinator
pub mod coordinator;
/// Post-flush materialisation dispatch
pub mod queue;

pub use coordinator::{FlushCoordinator, FlushReport, FlushTarget};
pub use queue::{
    FailureHook, FlushContext, FlushQueue, Materialiser, MemoryFlushQueue, ObjectStoreFlushQueue,
};
