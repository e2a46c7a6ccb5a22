//! Dead Letter Queue (DLQ) management
//!
//! Handles jobs that exhausted their retries or can never be processed.
//! `DeadLetterSink` is the write seam used by the worker; `DlqManager` is the
//! Redis stream implementation with the inspection and replay operations used
//! by the admin endpoints.

use crate::error::StreamError;
use crate::policy::DlqReason;
use crate::registry::{MessageKey, StreamJob};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

// Type alias for Redis stream entries
type StreamEntries = Vec<(String, Vec<(String, String)>)>;

/// XRANGE COUNT covering `offset + limit` entries, clamped to what Redis accepts.
fn range_count(offset: usize, limit: usize) -> i64 {
    i64::try_from(offset.saturating_add(limit)).unwrap_or(i64::MAX)
}

/// Key holding the original body when it could not be decoded.
pub const RAW_BODY_KEY: &str = "rawBody";

/// A terminally failed message with its failure provenance.
///
/// The original message is flattened into the record, so a record for a job
/// reads as the job body plus the provenance fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    #[serde(flatten)]
    pub message: Map<String, Value>,
    pub dlq_reason: DlqReason,
    pub original_queue_name: String,
    pub final_error: String,
    pub total_retries: u32,
    /// ISO-8601 timestamps of every failed attempt, the final one included
    pub retry_history: Vec<String>,
}

impl DeadLetterRecord {
    /// Build a record for a decoded job.
    pub fn for_job<J: StreamJob>(
        job: &J,
        reason: DlqReason,
        queue_name: &str,
        final_error: impl Into<String>,
        failed_at: DateTime<Utc>,
    ) -> Result<Self, StreamError> {
        let message = match serde_json::to_value(job)? {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(RAW_BODY_KEY.to_string(), Value::String(other.to_string()));
                map
            }
        };

        let retry_history = job
            .retry_history()
            .into_iter()
            .chain(std::iter::once(failed_at))
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            .collect();

        Ok(Self {
            message,
            dlq_reason: reason,
            original_queue_name: queue_name.to_string(),
            final_error: final_error.into(),
            total_retries: job.retry_count(),
            retry_history,
        })
    }

    /// Build a record for a body that could not be decoded at all.
    pub fn for_raw(
        payload: &str,
        queue_name: &str,
        final_error: impl Into<String>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        let mut message = Map::new();
        message.insert(RAW_BODY_KEY.to_string(), Value::String(payload.to_string()));

        Self {
            message,
            dlq_reason: DlqReason::InvalidPayload,
            original_queue_name: queue_name.to_string(),
            final_error: final_error.into(),
            total_retries: 0,
            retry_history: vec![failed_at.to_rfc3339_opts(SecondsFormat::Millis, true)],
        }
    }

    /// The undecodable body, if this record holds one.
    pub fn raw_body(&self) -> Option<&str> {
        self.message.get(RAW_BODY_KEY).and_then(Value::as_str)
    }

    /// Decode the original job.
    pub fn job<J: StreamJob>(&self) -> Result<J, StreamError> {
        if self.raw_body().is_some() {
            return Err(StreamError::validation(
                "dead-letter record holds an undecodable body",
            ));
        }
        Ok(serde_json::from_value(Value::Object(self.message.clone()))?)
    }
}

/// Destination for terminally failed messages.
///
/// Implementations are fallible; the worker leaves the original message
/// unacknowledged when `send` fails.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Persist a record. Returns the sink's ID for it.
    async fn send(&self, record: &DeadLetterRecord) -> Result<String, StreamError>;
}

/// Dead Letter Queue manager backed by a Redis stream
#[derive(Clone)]
pub struct DlqManager {
    redis: ConnectionManager,
    source_stream: String,
    dlq_stream: String,
    max_length: i64,
}

impl DlqManager {
    /// Create a new DlqManager
    pub fn new(
        redis: ConnectionManager,
        source_stream: impl Into<String>,
        dlq_stream: impl Into<String>,
    ) -> Self {
        Self {
            redis,
            source_stream: source_stream.into(),
            dlq_stream: dlq_stream.into(),
            max_length: 10_000,
        }
    }

    /// Set the maximum DLQ length
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    /// Get the DLQ stream name
    pub fn dlq_stream(&self) -> &str {
        &self.dlq_stream
    }

    /// Get DLQ statistics
    pub async fn stats(&self) -> Result<DlqStats, StreamError> {
        let mut conn = self.redis.clone();

        let len: i64 = conn.xlen(&self.dlq_stream).await?;

        let oldest: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let newest: StreamEntries = redis::cmd("XREVRANGE")
            .arg(&self.dlq_stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        Ok(DlqStats {
            stream_name: self.dlq_stream.clone(),
            length: len,
            oldest_entry_id: oldest.first().map(|(id, _)| id.clone()),
            newest_entry_id: newest.first().map(|(id, _)| id.clone()),
        })
    }

    /// List DLQ entries, oldest first. An offset past the end yields nothing.
    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<DlqEntry>, StreamError> {
        let mut conn = self.redis.clone();

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(range_count(offset, limit))
            .query_async(&mut conn)
            .await?;

        Ok(entries
            .into_iter()
            .skip(offset)
            .filter_map(|(id, fields)| DlqEntry::from_fields(id, &fields))
            .collect())
    }

    /// Get a specific DLQ entry by ID
    pub async fn get(&self, dlq_id: &str) -> Result<Option<DlqEntry>, StreamError> {
        let mut conn = self.redis.clone();

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg(dlq_id)
            .arg(dlq_id)
            .query_async(&mut conn)
            .await?;

        Ok(entries
            .into_iter()
            .next()
            .and_then(|(id, fields)| DlqEntry::from_fields(id, &fields)))
    }

    /// Delete an entry from the DLQ
    pub async fn delete(&self, dlq_id: &str) -> Result<bool, StreamError> {
        let mut conn = self.redis.clone();

        let deleted: i64 = conn.xdel(&self.dlq_stream, &[dlq_id]).await?;

        debug!(dlq_id = %dlq_id, "Deleted DLQ entry");

        Ok(deleted > 0)
    }

    /// Purge all entries from the DLQ
    pub async fn purge(&self) -> Result<i64, StreamError> {
        let mut conn = self.redis.clone();

        let len: i64 = conn.xlen(&self.dlq_stream).await?;

        if len > 0 {
            let _: i64 = redis::cmd("XTRIM")
                .arg(&self.dlq_stream)
                .arg("MAXLEN")
                .arg(0)
                .query_async(&mut conn)
                .await?;

            info!(count = len, "Purged DLQ");
        }

        Ok(len)
    }

    /// Put a dead-lettered job back on the source stream with its retry
    /// count reset, and remove the DLQ entry.
    ///
    /// Returns the new stream ID, or None if the entry does not exist.
    pub async fn replay<J: StreamJob>(&self, dlq_id: &str) -> Result<Option<String>, StreamError> {
        let Some(entry) = self.get(dlq_id).await? else {
            return Ok(None);
        };

        let job = entry.record.job::<J>()?.for_replay();
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.redis.clone();

        let (stream_id, _deleted): (String, i64) = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&self.source_stream)
            .arg("*")
            .arg(MessageKey::Job.as_ref())
            .arg(&payload)
            .cmd("XDEL")
            .arg(&self.dlq_stream)
            .arg(dlq_id)
            .query_async(&mut conn)
            .await?;

        info!(
            dlq_id = %dlq_id,
            job_id = %job.job_id(),
            stream_id = %stream_id,
            "Replayed DLQ entry"
        );

        Ok(Some(stream_id))
    }
}

#[async_trait]
impl DeadLetterSink for DlqManager {
    async fn send(&self, record: &DeadLetterRecord) -> Result<String, StreamError> {
        let data = serde_json::to_string(record)?;
        let mut conn = self.redis.clone();

        let dlq_id: String = redis::cmd("XADD")
            .arg(&self.dlq_stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(MessageKey::Data.as_ref())
            .arg(&data)
            .query_async(&mut conn)
            .await
            .map_err(|e| StreamError::DeadLetter(e.to_string()))?;

        info!(
            dlq_id = %dlq_id,
            reason = %record.dlq_reason,
            total_retries = record.total_retries,
            error = %record.final_error,
            "Moved job to DLQ"
        );

        Ok(dlq_id)
    }
}

/// DLQ entry with its stream ID
#[derive(Debug, Clone, Serialize)]
pub struct DlqEntry {
    pub id: String,
    pub record: DeadLetterRecord,
}

impl DlqEntry {
    fn from_fields(id: String, fields: &[(String, String)]) -> Option<Self> {
        let data = fields
            .iter()
            .find(|(k, _)| k == MessageKey::Data.as_ref())
            .map(|(_, v)| v)?;
        let record = serde_json::from_str(data).ok()?;
        Some(Self { id, record })
    }
}

/// DLQ statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqStats {
    pub stream_name: String,
    pub length: i64,
    pub oldest_entry_id: Option<String>,
    pub newest_entry_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_count_saturates() {
        assert_eq!(range_count(0, 10), 10);
        assert_eq!(range_count(20, 10), 30);
        assert_eq!(range_count(usize::MAX, 10), i64::MAX);
        assert_eq!(range_count(usize::MAX - 5, usize::MAX), i64::MAX);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestJob {
        id: String,
        retry_count: u32,
        #[serde(default)]
        retry_history: Vec<DateTime<Utc>>,
    }

    impl StreamJob for TestJob {
        fn job_id(&self) -> String {
            self.id.clone()
        }
        fn retry_count(&self) -> u32 {
            self.retry_count
        }
        fn next_attempt(&self, failed_at: DateTime<Utc>) -> Self {
            let mut next = self.clone();
            next.retry_count += 1;
            next.retry_history.push(failed_at);
            next
        }
        fn for_replay(&self) -> Self {
            Self {
                retry_count: 0,
                retry_history: vec![],
                ..self.clone()
            }
        }
        fn retry_history(&self) -> Vec<DateTime<Utc>> {
            self.retry_history.clone()
        }
    }

    #[test]
    fn test_record_flattens_job() {
        let job = TestJob {
            id: "job-1".to_string(),
            retry_count: 0,
            retry_history: vec![],
        }
        .next_attempt(Utc::now())
        .next_attempt(Utc::now());

        let record = DeadLetterRecord::for_job(
            &job,
            DlqReason::MaxRetriesExceeded,
            "screenshots:jobs",
            "renderer crashed",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(record.total_retries, 2);
        assert_eq!(record.retry_history.len(), 3);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "job-1");
        assert_eq!(json["retry_count"], 2);
        assert_eq!(json["dlqReason"], "max_retries_exceeded");
        assert_eq!(json["originalQueueName"], "screenshots:jobs");
        assert_eq!(json["finalError"], "renderer crashed");
        assert_eq!(json["totalRetries"], 2);

        let back: DeadLetterRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.job::<TestJob>().unwrap(), job);
    }

    #[test]
    fn test_raw_record() {
        let record =
            DeadLetterRecord::for_raw("not json", "q", "expected value", Utc::now());

        assert_eq!(record.dlq_reason, DlqReason::InvalidPayload);
        assert_eq!(record.raw_body(), Some("not json"));
        assert_eq!(record.retry_history.len(), 1);
        assert!(matches!(
            record.job::<TestJob>(),
            Err(StreamError::Validation(_))
        ));
    }

    #[test]
    fn test_entry_from_fields() {
        let record = DeadLetterRecord::for_raw("{", "q", "eof", Utc::now());
        let fields = vec![(
            "data".to_string(),
            serde_json::to_string(&record).unwrap(),
        )];

        let entry = DlqEntry::from_fields("1-0".to_string(), &fields).unwrap();
        assert_eq!(entry.id, "1-0");
        assert_eq!(entry.record, record);

        assert!(DlqEntry::from_fields("2-0".to_string(), &[]).is_none());
    }
}
