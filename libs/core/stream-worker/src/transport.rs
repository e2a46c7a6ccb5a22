//! Queue transport seam.
//!
//! The worker and producer only talk to a queue through `QueueTransport`.
//! `RedisStreamTransport` (see `consumer.rs`) backs it with Redis Streams,
//! `MemoryTransport` (see `memory.rs`) with in-process state.

use crate::error::StreamError;
use crate::event::Delivery;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Longest delay a send may ask for.
pub const MAX_SEND_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Options for a single send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Keep the message invisible to consumers for this long.
    pub delay: Option<Duration>,

    /// Collapse sends sharing this key while one is in flight.
    pub deduplication_id: Option<String>,
}

impl SendOptions {
    /// Plain immediate send.
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Send that becomes visible after `delay`.
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Send collapsed with any in-flight send carrying the same key.
    pub fn deduplicated(key: impl Into<String>) -> Self {
        Self {
            deduplication_id: Some(key.into()),
            ..Self::default()
        }
    }

    /// Reject delays longer than [`MAX_SEND_DELAY`].
    pub fn validate(&self) -> Result<(), StreamError> {
        match self.delay {
            Some(requested) if requested > MAX_SEND_DELAY => Err(StreamError::DelayOutOfRange {
                requested,
                max: MAX_SEND_DELAY,
            }),
            _ => Ok(()),
        }
    }
}

/// What the transport did with a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Stored. For delayed sends the id is provisional until promotion.
    Enqueued { message_id: String },

    /// Absorbed by an earlier send with the same deduplication key.
    Deduplicated { existing_job_id: String },
}

impl SendOutcome {
    pub fn is_deduplicated(&self) -> bool {
        matches!(self, SendOutcome::Deduplicated { .. })
    }
}

/// Queue depth snapshot for health and admin endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueInfo {
    pub name: String,
    pub length: i64,
    pub pending: i64,
    pub delayed: i64,
}

/// A durable queue with at-least-once delivery.
///
/// A delivered message ends in exactly one of three ways: `ack` removes it,
/// `retry` replaces its body and makes it deliverable again, or neither is
/// called and it becomes deliverable again once the visibility timeout expires.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Store a serialized job. `job_id` is recorded against the
    /// deduplication key so later duplicates can report it.
    async fn send(
        &self,
        job_id: &str,
        payload: &str,
        options: &SendOptions,
    ) -> Result<SendOutcome, StreamError>;

    /// Take up to `max` deliverable messages, oldest first.
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, StreamError>;

    /// Remove a delivered message permanently.
    async fn ack(&self, delivery_id: &str) -> Result<(), StreamError>;

    /// Redeliver a message with an updated body.
    async fn retry(&self, delivery_id: &str, payload: &str) -> Result<(), StreamError>;

    /// Name of the queue, used as `originalQueueName` in dead-letter records.
    fn queue_name(&self) -> &str;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), StreamError> {
        Ok(())
    }

    /// Queue depth snapshot.
    async fn info(&self) -> Result<QueueInfo, StreamError>;
}
