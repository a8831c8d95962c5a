//! Batch lifecycle metrics.
//!
//! The orchestrator reports two metric kinds to a [`Telemetry`] sink:
//! "batch deleted" whenever a batch file leaves the disk and "batch closed"
//! whenever the writer stops appending to one. Both are fixed, typed records
//! that serialize to JSON with a `type` tag.

use std::sync::Mutex;
use std::time::Duration;

use evq_common::TrackingConsent;
use evq_config::UploadPerformance;
use serde::{Serialize, Serializer};
use tracing::{info, warn};

/// Version of the metric record layout.
pub const METRICS_SCHEMA_VERSION: u32 = 1;

/// Why a batch file was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The intake answered with this status code; the batch was consumed.
    IntakeCode(u16),
    /// Aged past `max_file_age_for_read` without being read.
    Obsolete,
    /// Removed to bring the directory back under its size budget.
    Purged,
    /// Could not be decoded, or its upload could not be initiated.
    Invalid,
    /// Consumed by a synchronous flush. Never reported.
    Flushed,
}

impl RemovalReason {
    pub fn include_in_metric(&self) -> bool {
        !matches!(self, RemovalReason::Flushed)
    }
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalReason::IntakeCode(code) => write!(f, "intake-code-{}", code),
            RemovalReason::Obsolete => write!(f, "obsolete"),
            RemovalReason::Purged => write!(f, "purged"),
            RemovalReason::Invalid => write!(f, "invalid"),
            RemovalReason::Flushed => write!(f, "flushed"),
        }
    }
}

impl Serialize for RemovalReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Uploader delay bounds in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploaderDelay {
    pub min: u64,
    pub max: u64,
}

/// "Batch deleted" metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchDeletedMetric {
    pub track: String,
    pub consent: TrackingConsent,
    pub uploader_delay: UploaderDelay,
    pub uploader_window: u64,
    pub in_background: bool,
    pub batch_age: u64,
    pub batch_removal_reason: RemovalReason,
}

/// "Batch closed" metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchClosedMetric {
    pub track: String,
    pub uploader_window: u64,
    /// Approximate: sum of the write sizes requested for the batch.
    pub batch_size: u64,
    pub batch_events_count: u64,
    pub batch_duration: u64,
    /// Closed because a new file was explicitly requested.
    pub forced_new: bool,
}

/// Metric record sent to the telemetry sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum BatchMetric {
    #[serde(rename = "batch deleted")]
    Deleted(BatchDeletedMetric),
    #[serde(rename = "batch closed")]
    Closed(BatchClosedMetric),
}

impl BatchMetric {
    pub fn name(&self) -> &'static str {
        match self {
            BatchMetric::Deleted(_) => "Batch Deleted",
            BatchMetric::Closed(_) => "Batch Closed",
        }
    }
}

/// Identity attached to metrics from one orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsData {
    pub track_name: String,
    pub consent_label: TrackingConsent,
    pub uploader_delay_min: Duration,
    pub uploader_delay_max: Duration,
}

impl MetricsData {
    pub fn new(
        track_name: impl Into<String>,
        consent_label: TrackingConsent,
        upload: &UploadPerformance,
    ) -> Self {
        Self {
            track_name: track_name.into(),
            consent_label,
            uploader_delay_min: upload.min_upload_delay,
            uploader_delay_max: upload.max_upload_delay,
        }
    }
}

/// Sink for storage metrics and internal errors.
pub trait Telemetry: Send + Sync {
    fn metric(&self, metric: BatchMetric);
    fn error(&self, message: &str, detail: Option<&str>);
}

/// Forwards metrics and errors to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn metric(&self, metric: BatchMetric) {
        let payload = serde_json::to_string(&metric).unwrap_or_default();
        info!(
            target: "evq::metrics",
            metric = metric.name(),
            version = METRICS_SCHEMA_VERSION,
            payload = %payload,
            "batch metric"
        );
    }

    fn error(&self, message: &str, detail: Option<&str>) {
        warn!(target: "evq::telemetry", detail = detail.unwrap_or(""), "{}", message);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn metric(&self, _metric: BatchMetric) {}
    fn error(&self, _message: &str, _detail: Option<&str>) {}
}

/// Keeps metrics in memory, for hosts that batch their own telemetry and
/// for inspection in tests.
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    metrics: Mutex<Vec<BatchMetric>>,
    errors: Mutex<Vec<String>>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> Vec<BatchMetric> {
        lock(&self.metrics).clone()
    }

    pub fn deleted(&self) -> Vec<BatchDeletedMetric> {
        lock(&self.metrics)
            .iter()
            .filter_map(|m| match m {
                BatchMetric::Deleted(d) => Some(d.clone()),
                BatchMetric::Closed(_) => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<BatchClosedMetric> {
        lock(&self.metrics)
            .iter()
            .filter_map(|m| match m {
                BatchMetric::Closed(c) => Some(c.clone()),
                BatchMetric::Deleted(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }

    pub fn clear(&self) {
        lock(&self.metrics).clear();
        lock(&self.errors).clear();
    }
}

impl Telemetry for InMemoryTelemetry {
    fn metric(&self, metric: BatchMetric) {
        lock(&self.metrics).push(metric);
    }

    fn error(&self, message: &str, detail: Option<&str>) {
        let line = match detail {
            Some(detail) => format!("{}: {}", message, detail),
            None => message.to_string(),
        };
        lock(&self.errors).push(line);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_reason_labels() {
        assert_eq!(RemovalReason::IntakeCode(202).to_string(), "intake-code-202");
        assert_eq!(RemovalReason::Obsolete.to_string(), "obsolete");
        assert_eq!(RemovalReason::Purged.to_string(), "purged");
        assert!(!RemovalReason::Flushed.include_in_metric());
        assert!(RemovalReason::Invalid.include_in_metric());
    }

    #[test]
    fn test_deleted_metric_json_shape() {
        let metric = BatchMetric::Deleted(BatchDeletedMetric {
            track: "logs".into(),
            consent: TrackingConsent::Granted,
            uploader_delay: UploaderDelay { min: 2000, max: 20000 },
            uploader_window: 10000,
            in_background: false,
            batch_age: 12345,
            batch_removal_reason: RemovalReason::IntakeCode(202),
        });
        let value = serde_json::to_value(&metric).unwrap();
        assert_eq!(value["type"], "batch deleted");
        assert_eq!(value["track"], "logs");
        assert_eq!(value["consent"], "granted");
        assert_eq!(value["uploader_delay"]["max"], 20000);
        assert_eq!(value["batch_removal_reason"], "intake-code-202");
    }

    #[test]
    fn test_in_memory_telemetry_splits_kinds() {
        let telemetry = InMemoryTelemetry::new();
        telemetry.metric(BatchMetric::Closed(BatchClosedMetric {
            track: "rum".into(),
            uploader_window: 1,
            batch_size: 10,
            batch_events_count: 2,
            batch_duration: 5,
            forced_new: false,
        }));
        telemetry.error("failed", Some("disk"));
        assert_eq!(telemetry.closed().len(), 1);
        assert!(telemetry.deleted().is_empty());
        assert_eq!(telemetry.errors(), vec!["failed: disk".to_string()]);
    }
}
