//! Processor trait and the generic StreamWorker implementation.
//!
//! This module provides:
//! - `StreamProcessor` trait for job processors
//! - `StreamWorker` struct for running the batch loop
//!
//! Messages of a batch are handled strictly one after another. Each one ends
//! acknowledged, handed back for redelivery with its retry count incremented,
//! or written to the dead-letter sink and then acknowledged. When the sink
//! write fails the message stays unacknowledged.

use crate::config::WorkerConfig;
use crate::dlq::{DeadLetterRecord, DeadLetterSink};
use crate::error::StreamError;
use crate::event::Delivery;
use crate::metrics::StreamMetrics;
use crate::policy::{DlqReason, RetryDecision};
use crate::registry::StreamJob;
use crate::summary::{BatchProcessingResult, BatchSummary, Disposition};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What a processor reports for a job that ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: String,
    pub artifact_url: Option<String>,
}

impl JobOutcome {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            artifact_url: None,
        }
    }

    pub fn with_artifact_url(mut self, url: impl Into<String>) -> Self {
        self.artifact_url = Some(url.into());
        self
    }
}

/// Trait for job processors.
///
/// Domain handlers implement this trait to process jobs from the stream.
/// Returning `Err` counts as a failed attempt; a job that ran but reports a
/// failure status must be returned as an error too.
///
/// # Example
///
/// ```rust,ignore
/// #[async_trait]
/// impl StreamProcessor<ThumbnailJob> for ThumbnailProcessor {
///     async fn process(&self, job: &ThumbnailJob) -> Result<JobOutcome, StreamError> {
///         let url = self.renderer.render(&job.source).await?;
///         Ok(JobOutcome::new("completed").with_artifact_url(url))
///     }
///
///     fn name(&self) -> &'static str {
///         "ThumbnailProcessor"
///     }
/// }
/// ```
#[async_trait]
pub trait StreamProcessor<J: StreamJob>: Send + Sync {
    /// Process a single job.
    async fn process(&self, job: &J) -> Result<JobOutcome, StreamError>;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;

    /// Health check for the processor.
    ///
    /// Override this to add custom health checks (e.g., checking external services).
    async fn health_check(&self) -> Result<bool, StreamError> {
        Ok(true)
    }
}

/// Generic stream worker that processes jobs using a processor.
///
/// # Type Parameters
///
/// * `J` - The job type (must implement `StreamJob`)
/// * `P` - The processor type (must implement `StreamProcessor<J>`)
pub struct StreamWorker<J, P>
where
    J: StreamJob,
    P: StreamProcessor<J>,
{
    transport: Arc<dyn QueueTransport>,
    dead_letters: Arc<dyn DeadLetterSink>,
    processor: Arc<P>,
    config: WorkerConfig,
    metrics: StreamMetrics,
    _phantom: PhantomData<fn() -> J>,
}

impl<J, P> StreamWorker<J, P>
where
    J: StreamJob + 'static,
    P: StreamProcessor<J> + 'static,
{
    /// Create a new stream worker.
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        dead_letters: Arc<dyn DeadLetterSink>,
        processor: P,
        config: WorkerConfig,
    ) -> Self {
        Self::with_arc_processor(transport, dead_letters, Arc::new(processor), config)
    }

    /// Create a new stream worker with an Arc processor.
    pub fn with_arc_processor(
        transport: Arc<dyn QueueTransport>,
        dead_letters: Arc<dyn DeadLetterSink>,
        processor: Arc<P>,
        config: WorkerConfig,
    ) -> Self {
        let metrics = StreamMetrics::new(transport.queue_name(), processor.name());
        Self {
            transport,
            dead_letters,
            processor,
            config,
            metrics,
            _phantom: PhantomData,
        }
    }

    /// Get the worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get the transport the worker reads from.
    pub fn transport(&self) -> Arc<dyn QueueTransport> {
        self.transport.clone()
    }

    /// Run the worker loop.
    ///
    /// Reads and processes batches until the shutdown receiver flips to
    /// `true`. The batch in progress is always finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            queue = %self.transport.queue_name(),
            consumer_id = %self.config.consumer_id,
            processor = %self.processor.name(),
            batch_size = %self.config.batch_size,
            max_retries = %self.config.max_retries,
            "Starting stream worker"
        );

        let is_blocking = self.config.blocking_timeout_ms.is_some();
        let depth_interval = Duration::from_secs(30);
        let mut last_depth = Instant::now();

        // Track consecutive errors for exponential backoff
        let mut consecutive_errors: u32 = 0;
        const MAX_BACKOFF_SECS: u64 = 30;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            let idle = match self.process_next_batch().await {
                Ok(summary) => {
                    if consecutive_errors > 0 {
                        info!("Connection recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }
                    summary.is_none()
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff_secs =
                        std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);

                    if e.is_connection_error() {
                        warn!(
                            error = %e,
                            consecutive_errors = %consecutive_errors,
                            backoff_secs = %backoff_secs,
                            "Connection error, backing off"
                        );
                    } else {
                        error!(error = %e, backoff_secs = %backoff_secs, "Error receiving batch");
                    }

                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                    }
                    continue;
                }
            };

            if last_depth.elapsed() >= depth_interval {
                match self.transport.info().await {
                    Ok(info) => self.metrics.queue_depth(&info),
                    Err(e) => debug!(error = %e, "Failed to read queue depth"),
                }
                last_depth = Instant::now();
            }

            // A blocking read already waited for messages
            if idle && !is_blocking {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        }

        info!("Stream worker stopped");
        Ok(())
    }

    /// Receive one batch and process it.
    ///
    /// Returns `Ok(None)` when nothing was delivered. Only a failure to
    /// receive the batch is returned as an error.
    pub async fn process_next_batch(&self) -> Result<Option<BatchSummary>, StreamError> {
        let deliveries = self.transport.receive(self.config.batch_size).await?;
        if deliveries.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.process_batch(deliveries).await))
    }

    /// Process a delivered batch sequentially.
    ///
    /// Never fails: every delivery yields exactly one result.
    pub async fn process_batch(&self, deliveries: Vec<Delivery>) -> BatchSummary {
        let batch_start = Instant::now();
        let mut results = Vec::with_capacity(deliveries.len());

        for delivery in deliveries {
            let message_id = delivery.id.clone();
            let started = Instant::now();

            let result = AssertUnwindSafe(self.handle_delivery(delivery))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    self.metrics.job_panicked();
                    error!(message_id = %message_id, panic = %message, "Message handling panicked");
                    BatchProcessingResult {
                        message_id,
                        job_id: None,
                        success: false,
                        status: "failed".to_string(),
                        disposition: Disposition::Unacknowledged,
                        artifact_url: None,
                        error: Some(format!("handler panicked: {message}")),
                        duration_ms: elapsed_ms(started),
                    }
                });

            results.push(result);
        }

        let elapsed = batch_start.elapsed();
        let summary = BatchSummary::from_results(results, elapsed.as_millis() as u64);
        self.metrics
            .batch_processed(summary.len(), summary.failure_count, elapsed);

        info!(
            batch_id = %summary.batch_id,
            size = summary.len(),
            success_rate = summary.success_rate,
            failure_count = summary.failure_count,
            total_duration_ms = summary.total_duration_ms,
            "Processed batch"
        );

        summary
    }

    /// Handle one delivery end to end.
    async fn handle_delivery(&self, delivery: Delivery) -> BatchProcessingResult {
        let started = Instant::now();
        self.metrics.job_received();

        let job = match delivery.decode::<J>() {
            Ok(job) => job,
            Err(e) => {
                warn!(message_id = %delivery.id, error = %e, "Undecodable message body");
                self.metrics.job_failed(e.category().as_str());
                let record = DeadLetterRecord::for_raw(
                    &delivery.payload,
                    self.transport.queue_name(),
                    e.to_string(),
                    Utc::now(),
                );
                let disposition = self
                    .dead_letter(&delivery.id, "undecodable", record)
                    .await;
                return failure_result(&delivery, None, disposition, e.to_string(), started);
            }
        };

        debug!(
            message_id = %delivery.id,
            job_id = %job.job_id(),
            retry_count = job.retry_count(),
            delivery_count = delivery.delivery_count,
            "Processing job"
        );

        let attempt = AssertUnwindSafe(self.attempt(&job)).catch_unwind().await;
        let outcome = match attempt {
            Ok(outcome) => outcome,
            Err(panic) => {
                self.metrics.job_panicked();
                Err(StreamError::execution(format!(
                    "processor panicked: {}",
                    panic_message(panic.as_ref())
                )))
            }
        };

        match outcome {
            Ok(outcome) => {
                self.metrics.job_processed(started.elapsed());
                let disposition = match self.transport.ack(&delivery.id).await {
                    Ok(()) => Disposition::Acked,
                    Err(e) => {
                        error!(message_id = %delivery.id, error = %e, "Failed to ACK message");
                        Disposition::Unacknowledged
                    }
                };
                BatchProcessingResult {
                    message_id: delivery.id,
                    job_id: Some(job.job_id()),
                    success: true,
                    status: outcome.status,
                    disposition,
                    artifact_url: outcome.artifact_url,
                    error: None,
                    duration_ms: elapsed_ms(started),
                }
            }
            Err(e) => {
                self.metrics.job_failed(e.category().as_str());
                let disposition = self.handle_failure(&delivery, &job, &e).await;
                failure_result(&delivery, Some(job.job_id()), disposition, e.to_string(), started)
            }
        }
    }

    /// Validate, then run the processor.
    async fn attempt(&self, job: &J) -> Result<JobOutcome, StreamError> {
        job.validate()?;
        self.processor.process(job).await
    }

    /// Apply the retry policy to a failed attempt.
    async fn handle_failure(&self, delivery: &Delivery, job: &J, error: &StreamError) -> Disposition {
        let decision = RetryDecision::for_failure(error, job.retry_count(), self.config.max_retries);

        warn!(
            message_id = %delivery.id,
            job_id = %job.job_id(),
            retry_count = job.retry_count(),
            error = %error,
            error_category = error.category().as_str(),
            decision = ?decision,
            "Job attempt failed"
        );

        match decision {
            RetryDecision::Retry { next_retry_count } => {
                let next = job.next_attempt(Utc::now());
                let payload = match serde_json::to_string(&next) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(job_id = %job.job_id(), error = %e, "Failed to serialize retry body");
                        return Disposition::Unacknowledged;
                    }
                };

                match self.transport.retry(&delivery.id, &payload).await {
                    Ok(()) => {
                        self.metrics.job_retried(next_retry_count);
                        info!(
                            job_id = %job.job_id(),
                            retry_attempt = next_retry_count,
                            "Scheduled job retry"
                        );
                        Disposition::Retried
                    }
                    Err(e) => {
                        error!(job_id = %job.job_id(), error = %e, "Failed to requeue job");
                        Disposition::Unacknowledged
                    }
                }
            }
            RetryDecision::DeadLetter(reason) => {
                let record = match DeadLetterRecord::for_job(
                    job,
                    reason,
                    self.transport.queue_name(),
                    error.to_string(),
                    Utc::now(),
                ) {
                    Ok(record) => record,
                    Err(e) => {
                        error!(job_id = %job.job_id(), error = %e, "Failed to build dead-letter record");
                        return Disposition::Unacknowledged;
                    }
                };
                self.dead_letter(&delivery.id, &job.job_id(), record).await
            }
        }
    }

    /// Write a record to the sink, then acknowledge the original.
    async fn dead_letter(&self, message_id: &str, job_id: &str, record: DeadLetterRecord) -> Disposition {
        let reason: DlqReason = record.dlq_reason;

        if let Err(e) = self.dead_letters.send(&record).await {
            self.metrics.dead_letter_failed();
            error!(
                message_id = %message_id,
                job_id = %job_id,
                error = %e,
                "Dead-letter send failed, leaving message unacknowledged"
            );
            return Disposition::Unacknowledged;
        }

        self.metrics.job_dead_lettered(reason);
        warn!(
            message_id = %message_id,
            job_id = %job_id,
            reason = %reason,
            total_retries = record.total_retries,
            "Job dead-lettered"
        );

        match self.transport.ack(message_id).await {
            Ok(()) => Disposition::DeadLettered,
            Err(e) => {
                error!(message_id = %message_id, error = %e, "Failed to ACK dead-lettered message");
                Disposition::Unacknowledged
            }
        }
    }
}

fn failure_result(
    delivery: &Delivery,
    job_id: Option<String>,
    disposition: Disposition,
    error: String,
    started: Instant,
) -> BatchProcessingResult {
    let status = match disposition {
        Disposition::Retried => "retrying",
        Disposition::DeadLettered => "dead_lettered",
        Disposition::Acked | Disposition::Unacknowledged => "failed",
    };

    BatchProcessingResult {
        message_id: delivery.id.clone(),
        job_id,
        success: false,
        status: status.to_string(),
        disposition,
        artifact_url: None,
        error: Some(error),
        duration_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
