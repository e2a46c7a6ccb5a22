//! In-process queue transport and dead-letter sink.
//!
//! Mirrors the Redis semantics (delayed visibility, dedup window, visibility
//! timeout, in-place redelivery) so the worker and producer can run without
//! Redis. Timing uses `tokio::time`, so tests can drive it with paused time.

use crate::dlq::{DeadLetterRecord, DeadLetterSink};
use crate::error::StreamError;
use crate::event::Delivery;
use crate::transport::{MAX_SEND_DELAY, QueueInfo, QueueTransport, SendOptions, SendOutcome};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    payload: String,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    ready: VecDeque<Entry>,
    delayed: Vec<(Instant, Entry)>,
    in_flight: HashMap<String, (Instant, Entry)>,
    dedup: HashMap<String, (Instant, String)>,
    acked: Vec<String>,
    rejected_jobs: HashSet<String>,
}

impl State {
    fn next_entry_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }

    /// Move due delayed entries and expired in-flight entries to `ready`.
    fn promote(&mut self, now: Instant) {
        let mut due: Vec<(Instant, Entry)> = Vec::new();
        self.delayed.retain(|(visible_at, entry)| {
            if *visible_at <= now {
                due.push((*visible_at, entry.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(visible_at, _)| *visible_at);
        self.ready.extend(due.into_iter().map(|(_, entry)| entry));

        let mut expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();
        for id in expired {
            if let Some((_, entry)) = self.in_flight.remove(&id) {
                debug!(delivery_id = %id, "Visibility timeout expired, redelivering");
                self.ready.push_front(entry);
            }
        }
    }
}

/// In-memory `QueueTransport`
pub struct MemoryTransport {
    name: String,
    visibility_timeout: Duration,
    dedup_window: Duration,
    state: Mutex<State>,
}

impl MemoryTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility_timeout: Duration::from_secs(30),
            dedup_window: Duration::from_secs(300),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Make every later send of `job_id` fail.
    pub async fn reject_sends_for(&self, job_id: impl Into<String>) {
        self.state.lock().await.rejected_jobs.insert(job_id.into());
    }

    /// Messages stored and not yet acknowledged (ready, delayed and in flight).
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.delayed.len() + state.in_flight.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn delayed_len(&self) -> usize {
        self.state.lock().await.delayed.len()
    }

    /// IDs acknowledged so far, in order.
    pub async fn acked(&self) -> Vec<String> {
        self.state.lock().await.acked.clone()
    }

    /// Current body of a stored message, wherever it is.
    pub async fn payload_of(&self, id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .ready
            .iter()
            .chain(state.delayed.iter().map(|(_, e)| e))
            .chain(state.in_flight.values().map(|(_, e)| e))
            .find(|e| e.id == id)
            .map(|e| e.payload.clone())
    }
}

#[async_trait]
impl QueueTransport for MemoryTransport {
    async fn send(
        &self,
        job_id: &str,
        payload: &str,
        options: &SendOptions,
    ) -> Result<SendOutcome, StreamError> {
        options.validate()?;
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let due = match options.delay {
            Some(delay) if !delay.is_zero() => Some(now.checked_add(delay).ok_or(
                StreamError::DelayOutOfRange {
                    requested: delay,
                    max: MAX_SEND_DELAY,
                },
            )?),
            _ => None,
        };

        if state.rejected_jobs.contains(job_id) {
            return Err(StreamError::Internal(format!(
                "queue {} rejected job {}",
                self.name, job_id
            )));
        }

        if let Some(key) = &options.deduplication_id {
            if let Some((expires_at, existing)) = state.dedup.get(key)
                && *expires_at > now
            {
                debug!(dedup_key = %key, existing_job_id = %existing, "Send absorbed by dedup window");
                return Ok(SendOutcome::Deduplicated {
                    existing_job_id: existing.clone(),
                });
            }
            state
                .dedup
                .insert(key.clone(), (now + self.dedup_window, job_id.to_string()));
        }

        let entry = Entry {
            id: state.next_entry_id(),
            payload: payload.to_string(),
            delivery_count: 0,
        };
        let message_id = entry.id.clone();

        match due {
            Some(due) => state.delayed.push((due, entry)),
            None => state.ready.push_back(entry),
        }

        Ok(SendOutcome::Enqueued { message_id })
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, StreamError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.promote(now);

        let mut deliveries = Vec::new();
        while deliveries.len() < max {
            let Some(mut entry) = state.ready.pop_front() else {
                break;
            };
            entry.delivery_count += 1;
            deliveries.push(
                Delivery::new(entry.id.clone(), entry.payload.clone())
                    .with_delivery_count(entry.delivery_count),
            );
            let deadline = now + self.visibility_timeout;
            state.in_flight.insert(entry.id.clone(), (deadline, entry));
        }

        Ok(deliveries)
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), StreamError> {
        let mut state = self.state.lock().await;
        match state.in_flight.remove(delivery_id) {
            Some(_) => {
                state.acked.push(delivery_id.to_string());
                Ok(())
            }
            None => Err(StreamError::Internal(format!(
                "delivery {} is not in flight",
                delivery_id
            ))),
        }
    }

    async fn retry(&self, delivery_id: &str, payload: &str) -> Result<(), StreamError> {
        let mut state = self.state.lock().await;
        match state.in_flight.remove(delivery_id) {
            Some((_, mut entry)) => {
                entry.payload = payload.to_string();
                state.ready.push_back(entry);
                Ok(())
            }
            None => Err(StreamError::Internal(format!(
                "delivery {} is not in flight",
                delivery_id
            ))),
        }
    }

    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<QueueInfo, StreamError> {
        let state = self.state.lock().await;
        Ok(QueueInfo {
            name: self.name.clone(),
            length: (state.ready.len() + state.in_flight.len()) as i64,
            pending: state.in_flight.len() as i64,
            delayed: state.delayed.len() as i64,
        })
    }
}

/// In-memory `DeadLetterSink` that can be told to fail
#[derive(Default)]
pub struct MemoryDeadLetterSink {
    records: Mutex<Vec<(String, DeadLetterRecord)>>,
    failures_left: AtomicU32,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn send(&self, record: &DeadLetterRecord) -> Result<String, StreamError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StreamError::DeadLetter("dead-letter store unavailable".into()));
        }

        let mut records = self.records.lock().await;
        let id = format!("dlq-{}", records.len() + 1);
        records.push((id.clone(), record.clone()));
        Ok(id)
    }
}
