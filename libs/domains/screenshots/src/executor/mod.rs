//! Execution adapters.
//!
//! The `ScreenshotExecutor` trait is the seam between the queue worker and the
//! rendering engine. The worker treats an `Err` and a failed status the same
//! way: both consume a retry.

mod http;

pub use http::{HttpExecutorConfig, HttpScreenshotExecutor};

use crate::error::ScreenshotResult;
use crate::models::{JobConfig, ValidatedParams};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Status reported by the rendering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
}

impl ExecutionResult {
    pub fn completed(artifact_url: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            artifact_url: Some(artifact_url.into()),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: ExecutionStatus::Failed,
            artifact_url: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Trait for screenshot rendering backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScreenshotExecutor: Send + Sync {
    /// Render a screenshot for the job.
    async fn execute(
        &self,
        job_id: &str,
        params: &ValidatedParams,
        config: &JobConfig,
    ) -> ScreenshotResult<ExecutionResult>;

    /// Get the executor name for logging.
    fn name(&self) -> &'static str;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> ScreenshotResult<bool>;
}
