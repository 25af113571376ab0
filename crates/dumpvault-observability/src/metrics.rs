//! Engine metrics
//!
//! Label sets are closed enums (backup kind, outcome), so cardinality is
//! fixed: five kinds times four outcomes at most.

use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

use dumpvault_core::BackupKind;

use crate::{DURATION_BUCKETS, SIZE_BUCKETS};

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
            Outcome::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineMetrics {
    registry: Registry,
    backups_total: CounterVec,          // cardinality: kind(5) x outcome(4)
    backup_duration_seconds: HistogramVec, // cardinality: kind(5)
    artifact_size_bytes: HistogramVec,  // cardinality: kind(5)
    restores_total: CounterVec,         // cardinality: outcome(4)
    restore_duration_seconds: HistogramVec, // cardinality: outcome(4)
    operations_active: Gauge,
    cleanup_deleted_total: IntCounter,
    cleanup_errors_total: IntCounter,
}

impl EngineMetrics {
    /// Create metrics registered in a private registry with `namespace` as
    /// prefix.
    pub fn new(namespace: &str) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let backups_total = CounterVec::new(
            Opts::new(
                format!("{namespace}_backups_total"),
                "Finished backups by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let backup_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{namespace}_backup_duration_seconds"),
                "Backup wall time in seconds by kind",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["kind"],
        )?;
        let artifact_size_bytes = HistogramVec::new(
            HistogramOpts::new(
                format!("{namespace}_artifact_size_bytes"),
                "Compressed artifact size by kind",
            )
            .buckets(SIZE_BUCKETS.to_vec()),
            &["kind"],
        )?;
        let restores_total = CounterVec::new(
            Opts::new(
                format!("{namespace}_restores_total"),
                "Finished restores by outcome",
            ),
            &["outcome"],
        )?;
        let restore_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{namespace}_restore_duration_seconds"),
                "Restore wall time in seconds by outcome",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["outcome"],
        )?;
        let operations_active = Gauge::with_opts(Opts::new(
            format!("{namespace}_operations_active"),
            "Backup and restore operations currently registered",
        ))?;
        let cleanup_deleted_total = IntCounter::with_opts(Opts::new(
            format!("{namespace}_cleanup_deleted_total"),
            "Backups removed by retention cleanup",
        ))?;
        let cleanup_errors_total = IntCounter::with_opts(Opts::new(
            format!("{namespace}_cleanup_errors_total"),
            "Retention cleanup deletions that failed",
        ))?;

        registry.register(Box::new(backups_total.clone()))?;
        registry.register(Box::new(backup_duration_seconds.clone()))?;
        registry.register(Box::new(artifact_size_bytes.clone()))?;
        registry.register(Box::new(restores_total.clone()))?;
        registry.register(Box::new(restore_duration_seconds.clone()))?;
        registry.register(Box::new(operations_active.clone()))?;
        registry.register(Box::new(cleanup_deleted_total.clone()))?;
        registry.register(Box::new(cleanup_errors_total.clone()))?;

        Ok(Self {
            registry,
            backups_total,
            backup_duration_seconds,
            artifact_size_bytes,
            restores_total,
            restore_duration_seconds,
            operations_active,
            cleanup_deleted_total,
            cleanup_errors_total,
        })
    }

    pub fn operation_started(&self) {
        self.operations_active.inc();
    }

    pub fn operation_finished(&self) {
        self.operations_active.dec();
    }

    pub fn record_backup(
        &self,
        kind: BackupKind,
        outcome: Outcome,
        duration: Duration,
        artifact_bytes: Option<u64>,
    ) {
        self.backups_total
            .with_label_values(&[kind.as_str(), outcome.as_str()])
            .inc();
        self.backup_duration_seconds
            .with_label_values(&[kind.as_str()])
            .observe(duration.as_secs_f64());
        if let Some(bytes) = artifact_bytes {
            self.artifact_size_bytes
                .with_label_values(&[kind.as_str()])
                .observe(bytes as f64);
        }
    }

    pub fn record_restore(&self, outcome: Outcome, duration: Duration) {
        self.restores_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        self.restore_duration_seconds
            .with_label_values(&[outcome.as_str()])
            .observe(duration.as_secs_f64());
    }

    pub fn record_cleanup(&self, deleted: usize, errors: usize) {
        self.cleanup_deleted_total.inc_by(deleted as u64);
        self.cleanup_errors_total.inc_by(errors as u64);
    }

    pub fn active_operations(&self) -> f64 {
        self.operations_active.get()
    }

    pub fn prometheus_registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every engine metric.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

/// Metrics system errors
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metrics encoding failed: {0}")]
    Encoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_instances() {
        let a = EngineMetrics::new("dumpvault").unwrap();
        let b = EngineMetrics::new("dumpvault").unwrap();
        a.operation_started();
        assert_eq!(a.active_operations(), 1.0);
        assert_eq!(b.active_operations(), 0.0);
        a.operation_finished();
        assert_eq!(a.active_operations(), 0.0);
    }

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = EngineMetrics::new("dv").unwrap();
        metrics.record_backup(
            BackupKind::FullDaily,
            Outcome::Completed,
            Duration::from_secs(42),
            Some(4096),
        );
        metrics.record_restore(Outcome::Cancelled, Duration::from_secs(3));
        metrics.record_cleanup(2, 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("dv_backups_total{kind=\"full-daily\",outcome=\"completed\"} 1"));
        assert!(text.contains("dv_restores_total{outcome=\"cancelled\"} 1"));
        assert!(text.contains("dv_cleanup_deleted_total 2"));
        assert!(text.contains("dv_cleanup_errors_total 1"));
    }
}
