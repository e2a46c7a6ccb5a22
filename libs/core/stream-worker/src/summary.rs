//! Per-message results and per-batch summaries.
//!
//! Summaries are observational only: logged once per batch and returned to
//! the caller, never persisted.

use serde::Serialize;
use uuid::Uuid;

/// How a message left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Processed and acknowledged
    Acked,
    /// Body updated and handed back to the transport for redelivery
    Retried,
    /// Written to the dead-letter sink and acknowledged
    DeadLettered,
    /// Left unacknowledged; redelivered after the visibility timeout
    Unacknowledged,
}

/// Outcome of one message within a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProcessingResult {
    pub message_id: String,
    /// None when the body could not be decoded
    pub job_id: Option<String>,
    pub success: bool,
    pub status: String,
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Aggregate over one delivered batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub results: Vec<BatchProcessingResult>,
    /// Fraction of successful messages in `[0, 1]`; 0 for an empty batch
    pub success_rate: f64,
    pub total_duration_ms: u64,
    pub failure_count: usize,
}

impl BatchSummary {
    pub fn from_results(results: Vec<BatchProcessingResult>, total_duration_ms: u64) -> Self {
        let failure_count = results.iter().filter(|r| !r.success).count();
        let success_rate = if results.is_empty() {
            0.0
        } else {
            (results.len() - failure_count) as f64 / results.len() as f64
        };

        Self {
            batch_id: Uuid::new_v4(),
            results,
            success_rate,
            total_duration_ms,
            failure_count,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn count(&self, disposition: Disposition) -> usize {
        self.results
            .iter()
            .filter(|r| r.disposition == disposition)
            .count()
    }
}
