//! Retry and dead-letter policy.
//!
//! The retry count carried in the job body is the only input besides the
//! error itself; transport redelivery counters are never consulted.

use crate::error::{ErrorCategory, StreamError};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Retries allowed after the first attempt (3 attempts in total).
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Why a message ended up in the dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DlqReason {
    /// The job failed on every allowed attempt
    MaxRetriesExceeded,
    /// The body can never be processed
    InvalidPayload,
}

/// What to do with a message whose attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver with the retry count incremented.
    Retry { next_retry_count: u32 },
    /// Send to the dead-letter sink, then acknowledge.
    DeadLetter(DlqReason),
}

impl RetryDecision {
    /// Decide the fate of a failed attempt.
    pub fn for_failure(error: &StreamError, retry_count: u32, max_retries: u32) -> Self {
        match error.category() {
            ErrorCategory::Permanent => RetryDecision::DeadLetter(DlqReason::InvalidPayload),
            ErrorCategory::Transient if retry_count < max_retries => RetryDecision::Retry {
                next_retry_count: retry_count + 1,
            },
            ErrorCategory::Transient => RetryDecision::DeadLetter(DlqReason::MaxRetriesExceeded),
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}
