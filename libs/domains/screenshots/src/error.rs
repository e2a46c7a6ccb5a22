//! Error types for the screenshots domain.

use stream_worker::StreamError;
use thiserror::Error;

/// Result type for screenshot operations.
pub type ScreenshotResult<T> = Result<T, ScreenshotError>;

/// Errors that can occur in the screenshots domain.
#[derive(Debug, Error)]
pub enum ScreenshotError {
    /// A mandatory job parameter is missing or empty.
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// The preview URL is not an absolute http(s) URL.
    #[error("Invalid preview URL '{url}': {reason}")]
    InvalidPreviewUrl { url: String, reason: String },

    /// The job body carries a schema version this worker cannot read.
    #[error("Unsupported schema version: {0}")]
    UnsupportedSchema(String),

    /// The rendering service reported a failure status.
    #[error("Screenshot execution failed with status '{status}'")]
    ExecutionFailed { status: String },

    /// The rendering service could not be reached or answered with an error.
    #[error("Executor error: {0}")]
    Executor(String),

    /// Enqueueing failed.
    #[error("Queue error: {0}")]
    Queue(#[from] StreamError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScreenshotError {
    /// Whether the error comes from boundary validation of the job body.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ScreenshotError::MissingParameter(_)
                | ScreenshotError::InvalidPreviewUrl { .. }
                | ScreenshotError::UnsupportedSchema(_)
        )
    }
}

impl From<reqwest::Error> for ScreenshotError {
    fn from(err: reqwest::Error) -> Self {
        ScreenshotError::Executor(err.to_string())
    }
}

/// Validation errors are terminal for a message, everything else is retried.
impl From<ScreenshotError> for StreamError {
    fn from(e: ScreenshotError) -> Self {
        match e {
            ScreenshotError::Queue(inner) => inner,
            e if e.is_validation() => StreamError::validation(e.to_string()),
            e => StreamError::execution(e.to_string()),
        }
    }
}
