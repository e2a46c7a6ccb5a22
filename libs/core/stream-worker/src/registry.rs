//! Stream registry types and definitions.
//!
//! This module provides:
//! - `StreamDef` trait for domain-specific stream definitions
//! - `StreamJob` trait for job payloads carried through a stream
//! - `MessageKey` enum for the field names used in stream entries

use crate::error::StreamError;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Standard message keys used in stream entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MessageKey {
    /// The job payload (JSON serialized) on the main stream.
    Job,
    /// The dead-letter record (JSON serialized) on the DLQ stream.
    Data,
}

/// Stream definition trait.
///
/// Each domain implements this trait to define their stream configuration.
///
/// # Example
///
/// ```rust,ignore
/// use stream_worker::StreamDef;
///
/// pub struct ScreenshotStream;
///
/// impl StreamDef for ScreenshotStream {
///     const STREAM_NAME: &'static str = "screenshots:jobs";
///     const CONSUMER_GROUP: &'static str = "screenshot_workers";
///     const DLQ_STREAM: &'static str = "screenshots:dlq";
/// }
/// ```
pub trait StreamDef: Send + Sync {
    /// The Redis stream name (e.g., "screenshots:jobs").
    const STREAM_NAME: &'static str;

    /// The consumer group name for this stream.
    const CONSUMER_GROUP: &'static str;

    /// The dead letter queue stream name for failed jobs.
    const DLQ_STREAM: &'static str;

    /// Maximum stream length before auto-trim (MAXLEN).
    /// Default: 100,000 entries.
    const MAX_LENGTH: i64 = 100_000;

    /// Get the stream name.
    fn stream_name() -> &'static str {
        Self::STREAM_NAME
    }

    /// Get the consumer group name.
    fn consumer_group() -> &'static str {
        Self::CONSUMER_GROUP
    }

    /// Get the DLQ stream name.
    fn dlq_stream() -> &'static str {
        Self::DLQ_STREAM
    }
}

/// Trait for stream job payloads.
///
/// The retry counter lives in the job body itself; the worker never infers it
/// from transport redelivery counters.
///
/// # Example
///
/// ```rust,ignore
/// impl StreamJob for ThumbnailJob {
///     fn job_id(&self) -> String {
///         self.id.to_string()
///     }
///
///     fn retry_count(&self) -> u32 {
///         self.retry_count
///     }
///
///     fn next_attempt(&self, _failed_at: DateTime<Utc>) -> Self {
///         Self {
///             retry_count: self.retry_count + 1,
///             ..self.clone()
///         }
///     }
///
///     fn for_replay(&self) -> Self {
///         Self { retry_count: 0, ..self.clone() }
///     }
/// }
/// ```
pub trait StreamJob: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the job ID for logging and tracking.
    fn job_id(&self) -> String;

    /// Returns the current retry count.
    fn retry_count(&self) -> u32;

    /// The body to redeliver after a failed attempt: same job ID, retry count
    /// incremented by one, failure time appended to the history.
    fn next_attempt(&self, failed_at: DateTime<Utc>) -> Self;

    /// The body to enqueue when a dead-lettered job is replayed by hand.
    fn for_replay(&self) -> Self;

    /// Timestamps of previous failed attempts.
    fn retry_history(&self) -> Vec<DateTime<Utc>> {
        Vec::new()
    }

    /// Boundary validation. An error here is terminal for the message.
    fn validate(&self) -> Result<(), StreamError> {
        Ok(())
    }

    /// Check if the job has exhausted its retries.
    fn exceeded_max_retries(&self, max_retries: u32) -> bool {
        self.retry_count() >= max_retries
    }
}
