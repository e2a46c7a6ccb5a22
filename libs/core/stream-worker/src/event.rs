//! Delivered message envelope
//!
//! Wraps a raw job body with its stream metadata (ID, timestamp, delivery count).
//! The body stays a string until the worker decodes it, so undecodable payloads
//! can still be dead-lettered with their raw content.

use crate::error::StreamError;
use crate::registry::StreamJob;
use chrono::{DateTime, Utc};

/// A message handed to the worker by a transport
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Transport entry ID (e.g., "1234567890123-0" for Redis)
    pub id: String,

    /// Serialized job body
    pub payload: String,

    /// When the entry was created (parsed from the stream ID where possible)
    pub enqueued_at: DateTime<Utc>,

    /// Number of times this entry has been delivered
    pub delivery_count: u32,
}

impl Delivery {
    /// Create a first delivery
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        let id = id.into();
        let enqueued_at = Self::parse_timestamp(&id);
        Self {
            id,
            payload: payload.into(),
            enqueued_at,
            delivery_count: 1,
        }
    }

    /// Create a delivery with an explicit delivery count
    pub fn with_delivery_count(mut self, delivery_count: u32) -> Self {
        self.delivery_count = delivery_count;
        self
    }

    /// Parse timestamp from a Redis stream ID
    ///
    /// Stream IDs are in format "timestamp_ms-sequence"
    fn parse_timestamp(id: &str) -> DateTime<Utc> {
        id.split('-')
            .next()
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    /// Decode the body into a job
    pub fn decode<J: StreamJob>(&self) -> Result<J, StreamError> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Check if this is a redelivery
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    /// Get age in milliseconds
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.enqueued_at).num_milliseconds()
    }
}
