//! Lakehouse maintenance: compaction, checkpoints, orphan sweeps and the
//! scheduler that drives them

/// Checkpoint generator
pub mod checkpoint;
/// Delta file compactor
pub mod compactor;
/// Maintenance runner
pub mod maintenance;
/// Maintenance scheduler
pub mod scheduler;

pub use checkpoint::CheckpointGenerator;
pub use compactor::{CompactionReport, Compactor};
pub use maintenance::{MaintenanceJob, MaintenanceReport, MaintenanceRunner, MaintenanceTask};
pub use scheduler::{MaintenanceScheduler, TaskProvider};
