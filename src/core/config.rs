//! Configuration management for the lakesync gateway
//!
//! This module holds all configuration structures with the gateway's
//! documented defaults. Values load from an optional TOML file and may be
//! overridden per-setting through `LAKESYNC_*` environment variables.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway / buffer configuration
    pub gateway: GatewayConfig,

    /// Compaction configuration
    pub compaction: CompactionConfig,

    /// Maintenance configuration
    pub maintenance: MaintenanceConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Checkpoint configuration
    pub checkpoint: CheckpointConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Format of flushed delta files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushFormat {
    /// JSON flush envelope
    Json,
    /// Parquet via the injected codec
    #[default]
    Parquet,
}

/// Gateway and buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Stable identifier embedded in object keys
    pub gateway_id: String,

    /// Buffer size that triggers a flush
    pub max_buffer_bytes: usize,

    /// Buffer age that triggers a flush, in milliseconds
    pub max_buffer_age_ms: u64,

    /// Buffer size beyond which pushes are rejected whole.
    /// `None` defaults to twice `max_buffer_bytes`.
    pub max_backpressure_bytes: Option<usize>,

    /// Optional per-table byte budget triggering a table flush
    pub per_table_budget_bytes: Option<usize>,

    /// Flushed file format
    pub flush_format: FlushFormat,

    /// Optional prefix inserted into flush object keys
    pub flush_key_prefix: Option<String>,

    /// Catalogue namespace for parquet flush commits
    pub catalogue_namespace: Vec<String>,

    /// Optional adaptive buffer sizing
    pub adaptive: Option<AdaptiveBufferConfig>,
}

/// Adaptive buffer sizing: shrink the flush threshold when deltas are wide
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveBufferConfig {
    /// Average delta size that marks the stream as wide-column
    pub wide_column_threshold_bytes: usize,

    /// Divisor applied to `max_buffer_bytes` for wide-column streams
    pub reduction_factor: f64,
}

/// Compaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Fewer input files than this is a no-op
    pub min_delta_files: usize,

    /// Input files consumed per cycle at most
    pub max_delta_files: usize,

    /// Target size for emitted base files
    pub target_file_size_bytes: usize,
}

/// Maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Snapshots retained by the catalogue (reserved)
    pub retain_snapshots: usize,

    /// Minimum age before an unreferenced object may be swept
    pub orphan_age_ms: u64,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick period in milliseconds
    pub interval_ms: u64,

    /// Whether the scheduler may start at all
    pub enabled: bool,
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Chunk size bound, estimated on the protobuf encoding
    pub chunk_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_id: format!("gw-{}", uuid::Uuid::new_v4().simple()),
            max_buffer_bytes: 8 * 1024 * 1024, // 8MB
            max_buffer_age_ms: 30_000,
            max_backpressure_bytes: None,
            per_table_budget_bytes: None,
            flush_format: FlushFormat::Parquet,
            flush_key_prefix: None,
            catalogue_namespace: vec!["lakesync".to_string()],
            adaptive: None,
        }
    }
}

impl GatewayConfig {
    /// The backpressure bound: explicit, or twice the buffer bound
    pub fn backpressure_bytes(&self) -> usize {
        self.max_backpressure_bytes
            .unwrap_or_else(|| self.max_buffer_bytes.saturating_mul(2))
    }
}

impl Default for AdaptiveBufferConfig {
    fn default() -> Self {
        Self { wide_column_threshold_bytes: 4096, reduction_factor: 2.0 }
    }
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_delta_files: 10,
            max_delta_files: 20,
            target_file_size_bytes: 128 * 1024 * 1024, // 128MB
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            retain_snapshots: 5,
            orphan_age_ms: 3_600_000, // 1h
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_ms: 60_000, enabled: true }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl Config {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // Try to load from config file first
        if let Ok(file_config) = Self::from_file("lakesync.toml") {
            config = file_config;
        }

        // Override with environment variables
        config.apply_env_overrides()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {e}")))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        fn parse<T: std::str::FromStr>(name: &str, raw: String) -> Result<T> {
            raw.parse()
                .map_err(|_| Error::config(format!("Invalid {name}: '{raw}'")))
        }

        if let Ok(id) = env::var("LAKESYNC_GATEWAY_ID") {
            self.gateway.gateway_id = id;
        }
        if let Ok(raw) = env::var("LAKESYNC_MAX_BUFFER_BYTES") {
            self.gateway.max_buffer_bytes = parse("max buffer bytes", raw)?;
        }
        if let Ok(raw) = env::var("LAKESYNC_MAX_BUFFER_AGE_MS") {
            self.gateway.max_buffer_age_ms = parse("max buffer age", raw)?;
        }
        if let Ok(raw) = env::var("LAKESYNC_MAX_BACKPRESSURE_BYTES") {
            self.gateway.max_backpressure_bytes = Some(parse("max backpressure bytes", raw)?);
        }
        if let Ok(raw) = env::var("LAKESYNC_FLUSH_FORMAT") {
            self.gateway.flush_format = match raw.as_str() {
                "json" => FlushFormat::Json,
                "parquet" => FlushFormat::Parquet,
                other => {
                    return Err(Error::config(format!("Invalid flush format: '{other}'")));
                }
            };
        }
        if let Ok(raw) = env::var("LAKESYNC_SCHEDULER_INTERVAL_MS") {
            self.scheduler.interval_ms = parse("scheduler interval", raw)?;
        }
        if let Ok(raw) = env::var("LAKESYNC_SCHEDULER_ENABLED") {
            self.scheduler.enabled = parse("scheduler enabled", raw)?;
        }
        if let Ok(raw) = env::var("LAKESYNC_ORPHAN_AGE_MS") {
            self.maintenance.orphan_age_ms = parse("orphan age", raw)?;
        }
        if let Ok(level) = env::var("LAKESYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("LAKESYNC_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.gateway.gateway_id.is_empty() {
            return Err(Error::config("gateway_id must not be empty"));
        }
        if self.gateway.max_buffer_bytes == 0 {
            return Err(Error::config("max_buffer_bytes must be positive"));
        }
        if self.gateway.backpressure_bytes() < self.gateway.max_buffer_bytes {
            return Err(Error::config(
                "max_backpressure_bytes must be at least max_buffer_bytes",
            ));
        }
        if let Some(adaptive) = &self.gateway.adaptive {
            if adaptive.reduction_factor < 1.0 {
                return Err(Error::config("adaptive reduction_factor must be at least 1.0"));
            }
        }
        if self.compaction.min_delta_files == 0
            || self.compaction.max_delta_files < self.compaction.min_delta_files
        {
            return Err(Error::config(
                "compaction requires 0 < min_delta_files <= max_delta_files",
            ));
        }
        if self.compaction.target_file_size_bytes == 0 {
            return Err(Error::config("target_file_size_bytes must be positive"));
        }
        if self.scheduler.interval_ms == 0 {
            return Err(Error::config("scheduler interval_ms must be positive"));
        }
        if self.checkpoint.chunk_bytes == 0 {
            return Err(Error::config("checkpoint chunk_bytes must be positive"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.compaction.min_delta_files, 10);
        assert_eq!(config.compaction.max_delta_files, 20);
        assert_eq!(config.compaction.target_file_size_bytes, 128 * 1024 * 1024);
        assert_eq!(config.maintenance.retain_snapshots, 5);
        assert_eq!(config.maintenance.orphan_age_ms, 3_600_000);
        assert_eq!(config.scheduler.interval_ms, 60_000);
        assert!(config.scheduler.enabled);
        assert_eq!(config.checkpoint.chunk_bytes, 16 * 1024 * 1024);
        assert_eq!(config.gateway.flush_format, FlushFormat::Parquet);
        assert!(config.gateway.gateway_id.starts_with("gw-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backpressure_defaults_to_twice_the_buffer() {
        let mut gateway = GatewayConfig::default();
        gateway.max_buffer_bytes = 100;
        assert_eq!(gateway.backpressure_bytes(), 200);
        gateway.max_backpressure_bytes = Some(150);
        assert_eq!(gateway.backpressure_bytes(), 150);
    }

    #[test]
    fn toml_round_trip() {
        let raw = r#"
            [gateway]
            gateway_id = "gw-test"
            max_buffer_bytes = 1024
            flush_format = "json"

            [compaction]
            min_delta_files = 2
            max_delta_files = 4

            [scheduler]
            interval_ms = 5000
            enabled = false
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.gateway.gateway_id, "gw-test");
        assert_eq!(config.gateway.flush_format, FlushFormat::Json);
        assert_eq!(config.compaction.min_delta_files, 2);
        assert_eq!(config.scheduler.interval_ms, 5000);
        assert!(!config.scheduler.enabled);
        // Unspecified sections keep their defaults.
        assert_eq!(config.checkpoint.chunk_bytes, 16 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_file_reads_toml_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lakesync.toml");
        std::fs::write(
            &path,
            "[gateway]\ngateway_id = \"gw-file\"\n\n[maintenance]\norphan_age_ms = 1000\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.gateway.gateway_id, "gw-file");
        assert_eq!(config.maintenance.orphan_age_ms, 1000);

        assert!(matches!(
            Config::from_file(dir.path().join("missing.toml")),
            Err(Error::Config(_))
        ));

        std::fs::write(&path, "gateway = 7").unwrap();
        assert!(matches!(Config::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn validation_rejects_inconsistent_bounds() {
        let mut config = Config::default();
        config.gateway.max_backpressure_bytes = Some(1);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.compaction.max_delta_files = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scheduler.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.adaptive =
            Some(AdaptiveBufferConfig { wide_column_threshold_bytes: 10, reduction_factor: 0.5 });
        assert!(config.validate().is_err());
    }
}
