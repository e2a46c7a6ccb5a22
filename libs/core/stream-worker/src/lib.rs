//! Stream Worker Framework
//!
//! A generic job queue framework for processing background jobs with bounded
//! retries and dead-lettering, backed by Redis Streams.
//!
//! ## Features
//!
//! - **Generic worker**: `StreamWorker<J, P>` processes batches of any job type, one message at a time
//! - **Retry policy**: the retry count travels in the job body; failures are redelivered up to `max_retries`
//! - **Dead Letter Queue**: exhausted and invalid jobs are written to a `DeadLetterSink` before being acknowledged
//! - **Producer policies**: immediate, delayed and deduplicated sends, plus batch sends
//! - **Transports**: Redis Streams consumer groups, or in-memory for local runs and tests
//! - **Prometheus metrics**: Built-in observability
//! - **Health endpoints**: K8s-ready liveness and readiness probes, DLQ admin
//!
//! ## Example
//!
//! ```ignore
//! use stream_worker::{RedisStreamTransport, DlqManager, StreamWorker, StreamDef, WorkerConfig};
//!
//! struct MyStream;
//! impl StreamDef for MyStream {
//!     const STREAM_NAME: &'static str = "my:jobs";
//!     const CONSUMER_GROUP: &'static str = "my_workers";
//!     const DLQ_STREAM: &'static str = "my:dlq";
//! }
//!
//! let config = WorkerConfig::from_stream_def::<MyStream>();
//! let transport = Arc::new(RedisStreamTransport::new(redis.clone(), config.clone()));
//! let dlq = Arc::new(DlqManager::new(redis, MyStream::STREAM_NAME, MyStream::DLQ_STREAM));
//! let worker = StreamWorker::<MyJob, _>::new(transport, dlq, processor, config);
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod consumer;
mod dlq;
mod error;
mod event;
mod health;
mod memory;
pub mod metrics;
mod policy;
mod producer;
mod registry;
mod summary;
mod transport;
mod worker;

// Re-export main types
pub use config::WorkerConfig;
pub use consumer::RedisStreamTransport;
pub use dlq::{DeadLetterRecord, DeadLetterSink, DlqEntry, DlqManager, DlqStats, RAW_BODY_KEY};
pub use error::{BatchSendFailure, ErrorCategory, StreamError};
pub use event::Delivery;
pub use health::{dlq_admin_router, full_admin_router, health_router, DlqAdminState, HealthState};
pub use memory::{MemoryDeadLetterSink, MemoryTransport};
pub use metrics::{init_metrics, StreamMetrics};
pub use policy::{DlqReason, RetryDecision, DEFAULT_MAX_RETRIES};
pub use producer::StreamProducer;
pub use registry::{MessageKey, StreamDef, StreamJob};
pub use summary::{BatchProcessingResult, BatchSummary, Disposition};
pub use transport::{MAX_SEND_DELAY, QueueInfo, QueueTransport, SendOptions, SendOutcome};
pub use worker::{JobOutcome, StreamProcessor, StreamWorker};
