//! Stream producer for job enqueuing
//!
//! Generic producer that can be used by any service to queue jobs
//! for background processing. It never retries a failed send; the failure
//! goes back to the caller with the serialized job and its send options.
//!
//! # Example
//!
//! ```rust,ignore
//! use stream_worker::{SendOptions, StreamProducer};
//!
//! let producer = StreamProducer::new(transport);
//!
//! let outcome = producer.send(&job, SendOptions::immediate()).await?;
//! ```

use crate::error::{BatchSendFailure, StreamError};
use crate::registry::StreamJob;
use crate::transport::{QueueTransport, SendOptions, SendOutcome};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Generic stream producer for enqueuing jobs.
#[derive(Clone)]
pub struct StreamProducer {
    transport: Arc<dyn QueueTransport>,
}

impl StreamProducer {
    /// Create a new StreamProducer over a transport.
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self { transport }
    }

    /// Get the queue name.
    pub fn queue_name(&self) -> &str {
        self.transport.queue_name()
    }

    /// Enqueue a job.
    pub async fn send<J: StreamJob>(
        &self,
        job: &J,
        options: SendOptions,
    ) -> Result<SendOutcome, StreamError> {
        let job_id = job.job_id();
        let payload = serde_json::to_string(job)?;

        if let Err(source) = options.validate() {
            return Err(StreamError::Send {
                job_id,
                payload,
                options,
                source: Box::new(source),
            });
        }

        match self.transport.send(&job_id, &payload, &options).await {
            Ok(outcome) => {
                debug!(
                    queue = %self.queue_name(),
                    job_id = %job_id,
                    outcome = ?outcome,
                    "Enqueued job"
                );
                Ok(outcome)
            }
            Err(source) => Err(StreamError::Send {
                job_id,
                payload,
                options,
                source: Box::new(source),
            }),
        }
    }

    /// Enqueue several independent jobs.
    ///
    /// Every send is attempted. If any fail, the error lists each failure
    /// together with the IDs of the jobs that were enqueued.
    pub async fn send_batch<J: StreamJob>(
        &self,
        jobs: Vec<(J, SendOptions)>,
    ) -> Result<Vec<SendOutcome>, StreamError> {
        if jobs.is_empty() {
            return Ok(vec![]);
        }

        let attempted = jobs.len();
        let results = join_all(jobs.iter().map(|(job, options)| self.send(job, options.clone()))).await;

        let mut outcomes = Vec::with_capacity(attempted);
        let mut enqueued = Vec::new();
        let mut failures = Vec::new();

        for (index, ((job, _), result)) in jobs.iter().zip(results).enumerate() {
            match result {
                Ok(outcome) => {
                    enqueued.push(job.job_id());
                    outcomes.push(outcome);
                }
                Err(error) => failures.push(BatchSendFailure {
                    index,
                    job_id: job.job_id(),
                    error,
                }),
            }
        }

        if !failures.is_empty() {
            warn!(
                queue = %self.queue_name(),
                attempted = attempted,
                failed = failures.len(),
                "Batch send partially failed"
            );
            return Err(StreamError::BatchSend {
                attempted,
                enqueued,
                failures,
            });
        }

        debug!(queue = %self.queue_name(), count = attempted, "Enqueued batch of jobs");
        Ok(outcomes)
    }

    /// Get the current queue length.
    pub async fn stream_length(&self) -> Result<i64, StreamError> {
        Ok(self.transport.info().await?.length)
    }
}
