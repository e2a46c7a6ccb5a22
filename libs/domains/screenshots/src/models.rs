//! Screenshot job models.
//!
//! A `ScreenshotJob` is the message body carried through the queue. It is
//! serialized as camelCase JSON under the stream's `job` field.

use crate::error::{ScreenshotError, ScreenshotResult};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use stream_worker::{StreamError, StreamJob};
use uuid::Uuid;

/// Schema version written by this crate.
pub const SCHEMA_VERSION: &str = "1";

/// Priority used by `submit_with_priority`.
pub const PRIORITY_HIGH: i32 = 10;

/// Priority used by every other submission path.
pub const PRIORITY_DEFAULT: i32 = 5;

/// Default soft time budget handed to the executor.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_priority() -> i32 {
    PRIORITY_DEFAULT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Who asked for the screenshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitter {
    pub user_id: String,
    pub organization_id: String,
}

impl Submitter {
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
        }
    }
}

/// Job metadata. `job_id` is minted once at submission and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub job_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub submitter_user_id: String,
    pub organization_id: String,
    /// Bodies written before the field existed are read as version "1".
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Higher is more urgent.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub retry_count: u32,
    /// One timestamp per failed attempt.
    #[serde(default)]
    pub retry_history: Vec<DateTime<Utc>>,
}

/// Target of the screenshot as resolved by the front door.
///
/// Fields default to empty so that a body missing one of them still decodes
/// and fails validation instead of failing to parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParameters {
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub preview_url: String,
}

/// Parameters that passed boundary validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedParams {
    pub resource_id: String,
    pub plan_id: String,
    pub preview_url: Url,
}

impl JobParameters {
    pub fn new(
        resource_id: impl Into<String>,
        plan_id: impl Into<String>,
        preview_url: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            plan_id: plan_id.into(),
            preview_url: preview_url.into(),
        }
    }

    /// Check mandatory fields and parse the preview URL.
    pub fn validate(&self) -> ScreenshotResult<ValidatedParams> {
        let resource_id = required("resourceId", &self.resource_id)?;
        let plan_id = required("planId", &self.plan_id)?;
        let raw_url = required("previewUrl", &self.preview_url)?;

        let preview_url = Url::parse(raw_url).map_err(|e| ScreenshotError::InvalidPreviewUrl {
            url: raw_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(preview_url.scheme(), "http" | "https") {
            return Err(ScreenshotError::InvalidPreviewUrl {
                url: raw_url.to_string(),
                reason: format!("unsupported scheme '{}'", preview_url.scheme()),
            });
        }

        Ok(ValidatedParams {
            resource_id: resource_id.to_string(),
            plan_id: plan_id.to_string(),
            preview_url,
        })
    }
}

fn required<'a>(name: &'static str, value: &'a str) -> ScreenshotResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ScreenshotError::MissingParameter(name));
    }
    Ok(trimmed)
}

/// Execution settings passed through to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Soft budget, not enforced by the worker.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub debug: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            debug: false,
        }
    }
}

/// Screenshot job as carried through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotJob {
    pub metadata: JobMetadata,
    pub params: JobParameters,
    #[serde(default)]
    pub config: JobConfig,
}

impl ScreenshotJob {
    /// Create a fresh job with a new ID, default priority and no retries.
    pub fn new(submitter: &Submitter, params: JobParameters, config: JobConfig) -> Self {
        Self {
            metadata: JobMetadata {
                job_id: Uuid::now_v7(),
                created_at: Utc::now(),
                submitter_user_id: submitter.user_id.clone(),
                organization_id: submitter.organization_id.clone(),
                schema_version: default_schema_version(),
                priority: PRIORITY_DEFAULT,
                retry_count: 0,
                retry_history: Vec::new(),
            },
            params,
            config,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// Validate the body and return the parameters the executor needs.
    pub fn validated_params(&self) -> ScreenshotResult<ValidatedParams> {
        if self.metadata.schema_version != SCHEMA_VERSION {
            return Err(ScreenshotError::UnsupportedSchema(
                self.metadata.schema_version.clone(),
            ));
        }
        self.params.validate()
    }
}

impl StreamJob for ScreenshotJob {
    fn job_id(&self) -> String {
        self.metadata.job_id.to_string()
    }

    fn retry_count(&self) -> u32 {
        self.metadata.retry_count
    }

    fn next_attempt(&self, failed_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.metadata.retry_count += 1;
        next.metadata.retry_history.push(failed_at);
        next
    }

    fn for_replay(&self) -> Self {
        let mut replay = self.clone();
        replay.metadata.retry_count = 0;
        replay.metadata.retry_history.clear();
        replay
    }

    fn retry_history(&self) -> Vec<DateTime<Utc>> {
        self.metadata.retry_history.clone()
    }

    fn validate(&self) -> Result<(), StreamError> {
        self.validated_params().map(|_| ()).map_err(StreamError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> JobParameters {
        JobParameters::new("res-1", "plan-1", "https://preview.example.com/res-1")
    }

    fn job() -> ScreenshotJob {
        ScreenshotJob::new(
            &Submitter::new("user-1", "org-1"),
            params(),
            JobConfig::default(),
        )
    }

    #[test]
    fn test_new_job_defaults() {
        let job = job();
        assert_eq!(job.metadata.retry_count, 0);
        assert_eq!(job.metadata.priority, PRIORITY_DEFAULT);
        assert_eq!(job.metadata.schema_version, "1");
        assert!(job.metadata.retry_history.is_empty());
        assert_eq!(job.config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(job()).unwrap();
        assert!(value["metadata"]["jobId"].is_string());
        assert_eq!(value["metadata"]["retryCount"], 0);
        assert_eq!(value["metadata"]["submitterUserId"], "user-1");
        assert_eq!(value["params"]["previewUrl"], "https://preview.example.com/res-1");
        assert_eq!(value["config"]["timeoutMs"], 30_000);
    }

    #[test]
    fn test_body_without_schema_version_reads_as_v1() {
        let body = json!({
            "metadata": {
                "jobId": "0192f1a0-0000-7000-8000-000000000001",
                "createdAt": "2026-01-01T00:00:00Z",
                "submitterUserId": "user-1",
                "organizationId": "org-1",
                "retryCount": 1
            },
            "params": {
                "resourceId": "res-1",
                "planId": "plan-1",
                "previewUrl": "http://preview.local/res-1"
            }
        });

        let job: ScreenshotJob = serde_json::from_value(body).unwrap();
        assert_eq!(job.metadata.schema_version, "1");
        assert_eq!(job.metadata.priority, PRIORITY_DEFAULT);
        assert!(job.metadata.retry_history.is_empty());
        assert_eq!(job.config, JobConfig::default());
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_missing_preview_url_decodes_but_fails_validation() {
        let mut value = serde_json::to_value(job()).unwrap();
        value["params"].as_object_mut().unwrap().remove("previewUrl");

        let job: ScreenshotJob = serde_json::from_value(value).unwrap();
        let err = job.validated_params().unwrap_err();
        assert!(matches!(err, ScreenshotError::MissingParameter("previewUrl")));
        assert!(matches!(job.validate(), Err(StreamError::Validation(_))));
    }

    #[test]
    fn test_rejects_non_http_preview_url() {
        let err = JobParameters::new("res-1", "plan-1", "ftp://files.local/x")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ScreenshotError::InvalidPreviewUrl { .. }));

        let err = JobParameters::new("res-1", "plan-1", "not a url")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ScreenshotError::InvalidPreviewUrl { .. }));
    }

    #[test]
    fn test_blank_fields_are_missing() {
        let err = JobParameters::new("  ", "plan-1", "https://x.dev")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ScreenshotError::MissingParameter("resourceId")));
    }

    #[test]
    fn test_unknown_schema_version_is_rejected() {
        let mut job = job();
        job.metadata.schema_version = "2".to_string();
        assert!(matches!(
            job.validated_params(),
            Err(ScreenshotError::UnsupportedSchema(v)) if v == "2"
        ));
    }

    #[test]
    fn test_next_attempt_keeps_job_id() {
        let job = job();
        let failed_at = Utc::now();
        let next = job.next_attempt(failed_at);

        assert_eq!(next.job_id(), job.job_id());
        assert_eq!(next.retry_count(), 1);
        assert_eq!(next.retry_history(), vec![failed_at]);
        assert_eq!(next.params, job.params);

        let replay = next.next_attempt(Utc::now()).for_replay();
        assert_eq!(replay.job_id(), job.job_id());
        assert_eq!(replay.retry_count(), 0);
        assert!(replay.retry_history().is_empty());
    }
}
