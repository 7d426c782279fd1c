//! Core foundational modules: configuration, errors and gateway assembly

/// Configuration management
pub mod config;
/// Error types and handling
pub mod error;
/// Gateway assembly
pub mod gateway;

pub use config::{
    AdaptiveBufferConfig, CheckpointConfig, CompactionConfig, Config, FlushFormat, GatewayConfig,
    MaintenanceConfig, SchedulerConfig,
};
pub use error::{Error, Result};
pub use gateway::{SyncGateway, SyncGatewayBuilder};
