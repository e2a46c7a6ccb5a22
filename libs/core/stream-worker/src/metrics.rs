//! Prometheus metrics for stream workers
//!
//! Provides observability into worker performance and health.

use crate::error::StreamError;
use crate::policy::DlqReason;
use crate::transport::QueueInfo;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), StreamError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| StreamError::Config(format!("failed to install Prometheus recorder: {e}")))?;
        info!("Prometheus metrics initialized");
        Ok::<_, StreamError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Stream worker metrics helper
#[derive(Clone)]
pub struct StreamMetrics {
    /// Stream name for labeling
    stream_name: String,
    /// Processor name for labeling
    processor_name: String,
}

impl StreamMetrics {
    /// Create new StreamMetrics
    pub fn new(stream_name: impl Into<String>, processor_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            processor_name: processor_name.into(),
        }
    }

    /// Record a message being received
    pub fn job_received(&self) {
        counter!(
            "stream_worker_jobs_received_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .increment(1);
    }

    /// Record a job being processed successfully
    pub fn job_processed(&self, duration: Duration) {
        counter!(
            "stream_worker_jobs_processed_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "stream_worker_job_duration_seconds",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job failing
    pub fn job_failed(&self, category: &str) {
        counter!(
            "stream_worker_jobs_processed_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone(),
            "status" => "failed"
        )
        .increment(1);

        counter!(
            "stream_worker_job_errors_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    /// Record a job being retried
    pub fn job_retried(&self, retry_count: u32) {
        counter!(
            "stream_worker_jobs_retried_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone(),
            "attempt" => retry_count.to_string()
        )
        .increment(1);
    }

    /// Record a job moved to DLQ
    pub fn job_dead_lettered(&self, reason: DlqReason) {
        counter!(
            "stream_worker_jobs_dlq_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Record a dead-letter send that failed and left the message unacknowledged
    pub fn dead_letter_failed(&self) {
        counter!(
            "stream_worker_dlq_send_failures_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .increment(1);
    }

    /// Record a panic caught while handling a message
    pub fn job_panicked(&self) {
        counter!(
            "stream_worker_job_panics_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .increment(1);
    }

    /// Record one processed batch
    pub fn batch_processed(&self, size: usize, failures: usize, duration: Duration) {
        histogram!(
            "stream_worker_batch_size",
            "stream" => self.stream_name.clone()
        )
        .record(size as f64);

        histogram!(
            "stream_worker_batch_duration_seconds",
            "stream" => self.stream_name.clone()
        )
        .record(duration.as_secs_f64());

        counter!(
            "stream_worker_batch_failures_total",
            "stream" => self.stream_name.clone()
        )
        .increment(failures as u64);
    }

    /// Update queue depth gauges
    pub fn queue_depth(&self, info: &QueueInfo) {
        gauge!(
            "stream_worker_stream_depth",
            "stream" => self.stream_name.clone()
        )
        .set(info.length as f64);

        gauge!(
            "stream_worker_pending_count",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .set(info.pending as f64);

        gauge!(
            "stream_worker_delayed_count",
            "stream" => self.stream_name.clone()
        )
        .set(info.delayed as f64);
    }
}
