//! Screenshot processor for stream workers.
//!
//! This module provides the `ScreenshotProcessor` that implements
//! `StreamProcessor<ScreenshotJob>`, handing validated jobs to an executor.

use crate::error::ScreenshotError;
use crate::executor::ScreenshotExecutor;
use crate::models::ScreenshotJob;
use async_trait::async_trait;
use std::sync::Arc;
use stream_worker::{JobOutcome, StreamError, StreamJob, StreamProcessor};
use tracing::{info, warn};

/// Processor that renders screenshots through the configured executor.
pub struct ScreenshotProcessor<E: ScreenshotExecutor> {
    executor: Arc<E>,
}

impl<E: ScreenshotExecutor + 'static> ScreenshotProcessor<E> {
    /// Create a new screenshot processor.
    pub fn new(executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    /// Create a new screenshot processor with an Arc-wrapped executor.
    pub fn with_arc(executor: Arc<E>) -> Self {
        Self { executor }
    }

    /// Get a reference to the executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }
}

#[async_trait]
impl<E: ScreenshotExecutor + 'static> StreamProcessor<ScreenshotJob> for ScreenshotProcessor<E> {
    async fn process(&self, job: &ScreenshotJob) -> Result<JobOutcome, StreamError> {
        let job_id = job.job_id();
        let params = job.validated_params()?;

        info!(
            job_id = %job_id,
            resource_id = %params.resource_id,
            plan_id = %params.plan_id,
            retry_count = job.metadata.retry_count,
            executor = self.executor.name(),
            "Processing screenshot job"
        );

        let result = self
            .executor
            .execute(&job_id, &params, &job.config)
            .await?;

        if !result.is_success() {
            warn!(job_id = %job_id, status = %result.status, "Screenshot execution reported failure");
            return Err(ScreenshotError::ExecutionFailed {
                status: result.status.to_string(),
            }
            .into());
        }

        info!(
            job_id = %job_id,
            artifact_url = ?result.artifact_url,
            "Screenshot completed"
        );

        let outcome = JobOutcome::new(result.status.to_string());
        Ok(match result.artifact_url {
            Some(url) => outcome.with_artifact_url(url),
            None => outcome,
        })
    }

    fn name(&self) -> &'static str {
        "ScreenshotProcessor"
    }

    async fn health_check(&self) -> Result<bool, StreamError> {
        self.executor
            .health_check()
            .await
            .map_err(|e| StreamError::Internal(e.to_string()))
    }
}

impl<E: ScreenshotExecutor> Clone for ScreenshotProcessor<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
        }
    }
}
