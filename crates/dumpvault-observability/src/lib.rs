//! dumpvault observability
//!
//! Structured logging setup and Prometheus metrics for the backup engine.
//! Logging is initialised once per process by the binary; metrics live in an
//! [`EngineMetrics`] value owned by whoever builds the engine, so tests can
//! create as many as they like.

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "tracing")]
pub mod trace;

#[cfg(feature = "metrics")]
pub use metrics::{EngineMetrics, MetricsError, Outcome};

use dumpvault_core::config::{LogFormat, LogLevel, LoggingConfig};

/// Standard latency buckets for backup and restore durations, from one
/// second up to several hours.
pub const DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0,
];

/// Artifact size buckets in bytes, 1 KiB to 64 GiB.
pub const SIZE_BUCKETS: &[f64] = &[
    1024.0,
    1_048_576.0,
    16_777_216.0,
    134_217_728.0,
    1_073_741_824.0,
    8_589_934_592.0,
    68_719_476_736.0,
];

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Enable structured logging
    pub tracing_enabled: bool,
    /// Default level when `RUST_LOG` is unset
    pub level: LogLevel,
    pub format: LogFormat,
    /// Metrics namespace prefix
    pub namespace: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            tracing_enabled: true,
            level: LogLevel::Info,
            format: LogFormat::Json,
            namespace: "dumpvault".to_string(),
        }
    }
}

impl From<&LoggingConfig> for ObservabilityConfig {
    fn from(logging: &LoggingConfig) -> Self {
        Self {
            level: logging.level,
            format: logging.format,
            ..Self::default()
        }
    }
}

/// Initialize process-wide logging.
pub fn init_observability(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    #[cfg(feature = "tracing")]
    if config.tracing_enabled {
        trace::init_tracing(config)?;
    }

    #[cfg(not(feature = "tracing"))]
    let _ = config;

    Ok(())
}

/// Observability framework errors
#[derive(thiserror::Error, Debug)]
pub enum ObservabilityError {
    #[error("Metrics initialization failed: {0}")]
    MetricsInit(String),

    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),
}
