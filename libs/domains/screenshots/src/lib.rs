//! Screenshots Domain
//!
//! This module queues and processes screenshot-generation jobs.
//!
//! # Features
//!
//! - Immediate, priority, delayed and deduplicated submissions
//! - Batch submission with per-index failure reporting
//! - Versioned job bodies validated at the worker boundary
//! - Pluggable rendering backends behind `ScreenshotExecutor`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Front Door    │  ← Resolves resource, plan and preview URL
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ ScreenshotJobSvc│  ← Mints job IDs, applies delay/dedup
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   Redis Stream  │  ← screenshots:jobs queue
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐     ┌─────────────────┐
//! │Screenshot Worker│ ──► │ screenshots:dlq │  ← exhausted or invalid jobs
//! └────────┬────────┘     └─────────────────┘
//!          │
//! ┌────────▼────────┐
//! │    Executor     │  ← Rendering service
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_screenshots::{JobParameters, ScreenshotJobService, Submitter, dedup_key};
//!
//! let service = ScreenshotJobService::new(producer);
//!
//! let key = dedup_key(&resource_id, &plan_id, &user_id);
//! let receipt = service
//!     .submit_deduplicated(&submitter, params, &key, None)
//!     .await?;
//! ```

pub mod error;
pub mod executor;
pub mod models;
pub mod processor;
pub mod service;
pub mod streams;

// Re-export commonly used types
pub use error::{ScreenshotError, ScreenshotResult};
pub use executor::{
    ExecutionResult, ExecutionStatus, HttpExecutorConfig, HttpScreenshotExecutor,
    ScreenshotExecutor,
};
pub use models::{
    JobConfig, JobMetadata, JobParameters, PRIORITY_DEFAULT, PRIORITY_HIGH, SCHEMA_VERSION,
    ScreenshotJob, Submitter, ValidatedParams,
};
pub use processor::ScreenshotProcessor;
pub use service::{DedupReceipt, ScreenshotJobService, SubmitRequest, dedup_key};
pub use streams::ScreenshotStream;
