//! Stream error types and error categorization
//!
//! Errors are categorized to determine retry behavior:
//! - **Transient**: the attempt may succeed later, retry up to the configured limit
//! - **Permanent**: the message can never succeed, dead-letter it immediately

use crate::transport::SendOptions;
use std::time::Duration;
use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure - consumes one retry slot
    Transient,
    /// Unrecoverable error - dead-lettered without consuming a retry slot
    Permanent,
}

impl ErrorCategory {
    /// Whether errors of this category are ever retried
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }

    /// Label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

/// One failed send inside a batch submission.
#[derive(Debug)]
pub struct BatchSendFailure {
    /// Position of the job in the submitted batch
    pub index: usize,
    /// ID of the job that could not be sent
    pub job_id: String,
    /// Underlying failure
    pub error: StreamError,
}

/// Stream processing errors
#[derive(Error, Debug)]
pub enum StreamError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport refused or failed a send. Carries the serialized message and
    /// the options it was sent with.
    #[error("Failed to send job {job_id}: {source}")]
    Send {
        job_id: String,
        payload: String,
        options: SendOptions,
        #[source]
        source: Box<StreamError>,
    },

    /// At least one send in a batch failed. Every other send was still attempted.
    #[error("{} of {attempted} batch sends failed", failures.len())]
    BatchSend {
        attempted: usize,
        enqueued: Vec<String>,
        failures: Vec<BatchSendFailure>,
    },

    /// Requested send delay is longer than the transport accepts
    #[error("Send delay {requested:?} exceeds the maximum of {max:?}")]
    DelayOutOfRange { requested: Duration, max: Duration },

    /// Payload is malformed or missing required fields
    #[error("Invalid payload: {0}")]
    Validation(String),

    /// The job ran and failed (error or failure status)
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Dead-letter sink could not persist a record
    #[error("Dead-letter send failed: {0}")]
    DeadLetter(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Create a retryable execution error
    pub fn execution(message: impl Into<String>) -> Self {
        StreamError::Execution(message.into())
    }

    /// Create a terminal validation error
    pub fn validation(message: impl Into<String>) -> Self {
        StreamError::Validation(message.into())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Validation(_)
            | StreamError::Serialization(_)
            | StreamError::DelayOutOfRange { .. } => ErrorCategory::Permanent,
            _ => ErrorCategory::Transient,
        }
    }

    /// Check if this error should trigger a retry
    pub fn should_retry(&self, retry_count: u32, max_retries: u32) -> bool {
        self.category().should_retry() && retry_count < max_retries
    }

    /// Check if a Redis error looks like a dropped connection
    pub fn is_connection_error(&self) -> bool {
        match self {
            StreamError::Redis(e) => {
                e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}
