//! System-level concerns: metrics and monitoring

/// Prometheus metrics
pub mod metrics;

pub use metrics::Metrics;
