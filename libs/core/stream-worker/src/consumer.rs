//! Redis Streams transport
//!
//! Handles sending to and reading from Redis streams using consumer groups.
//!
//! Key layout for a stream `S`:
//! - `S` - the stream itself, one `job` field per entry
//! - `S:delayed` - sorted set of delayed bodies scored by due time (ms)
//! - `S:dedup:{key}` - job ID holding a deduplication key, with a TTL
//!
//! Deduplicated sends use `SET NX GET`, which needs Redis 7 or newer.
//!
//! `XREADGROUP BLOCK` holds its connection until it returns, and every
//! command multiplexed on that connection queues behind it. Pass a dedicated
//! connection for reads with [`RedisStreamTransport::with_reader`] so pings and
//! sends are not stalled by a blocking read.

use crate::config::WorkerConfig;
use crate::error::StreamError;
use crate::event::Delivery;
use crate::registry::MessageKey;
use crate::transport::{MAX_SEND_DELAY, QueueInfo, QueueTransport, SendOptions, SendOutcome};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};
use std::time::Duration;
use tracing::{debug, info, warn};

// Type aliases for Redis stream replies
type StreamEntries = Vec<(String, Vec<(String, String)>)>;
type StreamReadReply = Vec<(String, StreamEntries)>;

/// Moves due delayed bodies onto the stream.
///
/// KEYS[1] delayed set, KEYS[2] stream
/// ARGV[1] now (ms), ARGV[2] max entries to move, ARGV[3] stream MAXLEN
const PROMOTE_DELAYED: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, body in ipairs(due) do
    redis.call('XADD', KEYS[2], 'MAXLEN', '~', ARGV[3], '*', 'job', body)
    redis.call('ZREM', KEYS[1], body)
end
return #due
"#;

/// Score for a delayed body: `now_ms + delay` in epoch milliseconds.
fn due_at_ms(now_ms: i64, delay: Duration) -> Result<i64, StreamError> {
    i64::try_from(delay.as_millis())
        .ok()
        .and_then(|delay_ms| now_ms.checked_add(delay_ms))
        .ok_or(StreamError::DelayOutOfRange {
            requested: delay,
            max: MAX_SEND_DELAY,
        })
}

/// `QueueTransport` backed by a Redis stream and consumer group
pub struct RedisStreamTransport {
    redis: ConnectionManager,
    reader: ConnectionManager,
    config: WorkerConfig,
    promote_script: Script,
}

impl RedisStreamTransport {
    /// Create a new RedisStreamTransport
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self {
            reader: redis.clone(),
            redis,
            config,
            promote_script: Script::new(PROMOTE_DELAYED),
        }
    }

    /// Use a separate connection for `XREADGROUP`
    pub fn with_reader(mut self, reader: ConnectionManager) -> Self {
        self.reader = reader;
        self
    }

    /// Get a clone of the Redis connection
    pub fn redis(&self) -> ConnectionManager {
        self.redis.clone()
    }

    /// Get the consumer group
    pub fn consumer_group(&self) -> &str {
        &self.config.consumer_group
    }

    /// Get the consumer ID
    pub fn consumer_id(&self) -> &str {
        &self.config.consumer_id
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.config.stream_name)
    }

    fn dedup_key(&self, key: &str) -> String {
        format!("{}:dedup:{}", self.config.stream_name, key)
    }

    /// Initialize the consumer group if it doesn't exist
    pub async fn init_consumer_group(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0") // Start from beginning
            .arg("MKSTREAM") // Create stream if it doesn't exist
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
            }
            Err(e) => return Err(StreamError::Redis(e)),
        }

        Ok(())
    }

    async fn xadd(&self, payload: &str) -> Result<String, StreamError> {
        let mut conn = self.redis.clone();

        // MAXLEN ~ for approximate trimming
        let stream_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg(MessageKey::Job.as_ref())
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        Ok(stream_id)
    }

    async fn enqueue(&self, job_id: &str, payload: &str, options: &SendOptions) -> Result<String, StreamError> {
        match options.delay {
            Some(delay) if !delay.is_zero() => {
                let mut conn = self.redis.clone();
                let due_ms = due_at_ms(Utc::now().timestamp_millis(), delay)?;
                let _: i64 = conn.zadd(self.delayed_key(), payload, due_ms).await?;

                debug!(job_id = %job_id, due_ms = due_ms, "Scheduled delayed job");
                Ok(format!("delayed:{}", job_id))
            }
            _ => self.xadd(payload).await,
        }
    }

    /// Move due delayed bodies onto the stream.
    async fn promote_delayed(&self, count: usize) -> Result<i64, StreamError> {
        let mut conn = self.redis.clone();

        let moved: i64 = self
            .promote_script
            .key(self.delayed_key())
            .key(&self.config.stream_name)
            .arg(Utc::now().timestamp_millis())
            .arg(count)
            .arg(self.config.max_length)
            .invoke_async(&mut conn)
            .await?;

        if moved > 0 {
            debug!(count = moved, "Promoted delayed jobs");
        }
        Ok(moved)
    }

    /// Claim entries whose visibility timeout expired, from any consumer.
    async fn claim_abandoned(&self, count: usize) -> Result<Vec<Delivery>, StreamError> {
        let mut conn = self.redis.clone();

        // Extended XPENDING: (id, consumer, idle_ms, delivery_count)
        let pending: RedisResult<Vec<(String, String, i64, i64)>> = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(self.config.visibility_timeout_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await;

        let pending = match pending {
            Ok(p) => p,
            Err(e) if e.to_string().contains("NOGROUP") => return Ok(vec![]),
            Err(e) => return Err(StreamError::Redis(e)),
        };

        if pending.is_empty() {
            return Ok(vec![]);
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(self.config.visibility_timeout_ms);
        for (id, _, _, _) in &pending {
            cmd.arg(id);
        }

        let claimed: StreamEntries = cmd.query_async(&mut conn).await?;

        let deliveries: Vec<Delivery> = claimed
            .into_iter()
            .map(|(id, fields)| {
                let previous = pending
                    .iter()
                    .find(|(pid, _, _, _)| *pid == id)
                    .map(|(_, _, _, n)| *n as u32)
                    .unwrap_or(1);
                Self::to_delivery(id, &fields).with_delivery_count(previous + 1)
            })
            .collect();

        if !deliveries.is_empty() {
            warn!(count = deliveries.len(), "Claimed abandoned messages");
        }

        Ok(deliveries)
    }

    /// Read new entries through the consumer group
    async fn read_new(&self, count: usize, block: bool) -> Result<Vec<Delivery>, StreamError> {
        let mut conn = self.reader.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id);

        if let Some(timeout) = self.config.blocking_timeout_ms.filter(|_| block) {
            cmd.arg("BLOCK").arg(timeout);
        }

        cmd.arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">"); // Only new messages

        let result: RedisResult<Option<StreamReadReply>> = cmd.query_async(&mut conn).await;

        match result {
            Ok(Some(streams)) => Ok(streams
                .into_iter()
                .flat_map(|(_, entries)| entries)
                .map(|(id, fields)| Self::to_delivery(id, &fields))
                .collect()),
            Ok(None) => Ok(vec![]), // No messages (blocking timeout)
            Err(e) if e.to_string().contains("NOGROUP") => {
                warn!("Consumer group missing, recreating");
                self.init_consumer_group().await?;
                Ok(vec![])
            }
            Err(e) => Err(StreamError::Redis(e)),
        }
    }

    /// Entries without a `job` field are handed on with their fields as the
    /// body, so they fail decoding and get dead-lettered rather than lost.
    fn to_delivery(id: String, fields: &[(String, String)]) -> Delivery {
        match fields.iter().find(|(k, _)| k == MessageKey::Job.as_ref()) {
            Some((_, json)) => Delivery::new(id, json.as_str()),
            None => {
                warn!(
                    stream_id = %id,
                    fields = ?fields.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
                    "Missing 'job' field in message"
                );
                let raw = serde_json::to_string(fields).unwrap_or_default();
                Delivery::new(id, raw)
            }
        }
    }
}

#[async_trait]
impl QueueTransport for RedisStreamTransport {
    async fn send(
        &self,
        job_id: &str,
        payload: &str,
        options: &SendOptions,
    ) -> Result<SendOutcome, StreamError> {
        options.validate()?;

        let Some(dedup_id) = &options.deduplication_id else {
            let message_id = self.enqueue(job_id, payload, options).await?;
            return Ok(SendOutcome::Enqueued { message_id });
        };

        let mut conn = self.redis.clone();
        let key = self.dedup_key(dedup_id);

        // Claims the key and reads the current holder in one round trip.
        // Nil means this send now holds the key.
        let holder: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(job_id)
            .arg("NX")
            .arg("GET")
            .arg("EX")
            .arg(self.config.dedup_window_secs.max(1))
            .query_async(&mut conn)
            .await?;

        if let Some(existing_job_id) = holder {
            debug!(dedup_key = %dedup_id, existing_job_id = %existing_job_id, "Send absorbed by dedup window");
            return Ok(SendOutcome::Deduplicated { existing_job_id });
        }

        match self.enqueue(job_id, payload, options).await {
            Ok(message_id) => Ok(SendOutcome::Enqueued { message_id }),
            Err(e) => {
                // Release the key so a later submission is not absorbed by a job that never existed
                let released: RedisResult<i64> = conn.del(&key).await;
                if let Err(del_err) = released {
                    warn!(dedup_key = %dedup_id, error = %del_err, "Failed to release dedup key");
                }
                Err(e)
            }
        }
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, StreamError> {
        if let Err(e) = self.promote_delayed(max).await {
            warn!(error = %e, "Failed to promote delayed jobs");
        }

        let mut deliveries = self.claim_abandoned(max).await?;
        if deliveries.len() < max {
            // Only block when there is nothing else to hand back
            let block = deliveries.is_empty();
            deliveries.extend(self.read_new(max - deliveries.len(), block).await?);
        }

        Ok(deliveries)
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let _: i64 = redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(delivery_id)
            .query_async(&mut conn)
            .await?;

        debug!(stream_id = %delivery_id, "Acknowledged message");
        Ok(())
    }

    async fn retry(&self, delivery_id: &str, payload: &str) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        // Append the updated body and release the old entry together
        let (new_id, _acked): (String, i64) = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg(MessageKey::Job.as_ref())
            .arg(payload)
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(delivery_id)
            .query_async(&mut conn)
            .await?;

        debug!(stream_id = %delivery_id, new_stream_id = %new_id, "Requeued message");
        Ok(())
    }

    fn queue_name(&self) -> &str {
        &self.config.stream_name
    }

    async fn ping(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(StreamError::Internal(format!("unexpected PING response: {}", response)))
        }
    }

    async fn info(&self) -> Result<QueueInfo, StreamError> {
        let mut conn = self.redis.clone();

        let length: i64 = conn.xlen(&self.config.stream_name).await?;
        let delayed: i64 = conn.zcard(self.delayed_key()).await?;

        // Summary XPENDING: (count, smallest id, greatest id, per-consumer counts)
        let pending: RedisResult<(i64, Option<String>, Option<String>, Option<Vec<(String, String)>>)> =
            redis::cmd("XPENDING")
                .arg(&self.config.stream_name)
                .arg(&self.config.consumer_group)
                .query_async(&mut conn)
                .await;

        Ok(QueueInfo {
            name: self.config.stream_name.clone(),
            length,
            pending: pending.map(|(count, _, _, _)| count).unwrap_or(0),
            delayed,
        })
    }
}
