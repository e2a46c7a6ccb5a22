//! HTTP rendering service executor.

use super::{ExecutionResult, ScreenshotExecutor};
use crate::error::{ScreenshotError, ScreenshotResult};
use crate::models::{JobConfig, ValidatedParams};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Rendering service configuration.
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// Base URL of the rendering service, without a trailing slash.
    pub base_url: String,
}

impl HttpExecutorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn execute_url(&self) -> String {
        format!("{}/execute", self.base_url)
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

/// Executor that posts jobs to a rendering service over HTTP.
pub struct HttpScreenshotExecutor {
    config: HttpExecutorConfig,
    client: Client,
}

impl HttpScreenshotExecutor {
    pub fn new(config: HttpExecutorConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    job_id: &'a str,
    resource_id: &'a str,
    plan_id: &'a str,
    preview_url: &'a str,
    timeout_ms: u64,
    debug: bool,
}

#[async_trait]
impl ScreenshotExecutor for HttpScreenshotExecutor {
    async fn execute(
        &self,
        job_id: &str,
        params: &ValidatedParams,
        config: &JobConfig,
    ) -> ScreenshotResult<ExecutionResult> {
        let request = ExecuteRequest {
            job_id,
            resource_id: &params.resource_id,
            plan_id: &params.plan_id,
            preview_url: params.preview_url.as_str(),
            timeout_ms: config.timeout_ms,
            debug: config.debug,
        };

        debug!(
            job_id = %job_id,
            preview_url = %params.preview_url,
            timeout_ms = config.timeout_ms,
            "Requesting screenshot from rendering service"
        );

        let response = self
            .client
            .post(self.config.execute_url())
            .timeout(Duration::from_millis(config.timeout_ms))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                job_id = %job_id,
                status = %status,
                error = %body,
                "Rendering service rejected screenshot request"
            );
            return Err(ScreenshotError::Executor(format!(
                "rendering service error ({}): {}",
                status, body
            )));
        }

        Ok(response.json::<ExecutionResult>().await?)
    }

    fn name(&self) -> &'static str {
        "HttpScreenshotExecutor"
    }

    async fn health_check(&self) -> ScreenshotResult<bool> {
        let response = self.client.get(self.config.health_url()).send().await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionStatus;
    use crate::models::JobParameters;
    use axum::{Json, Router, http::StatusCode, routing::{get, post}};
    use serde_json::{Value, json};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn params() -> ValidatedParams {
        JobParameters::new("res-1", "plan-1", "https://preview.example.com/res-1")
            .validate()
            .unwrap()
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = HttpExecutorConfig::new("http://renderer:8080/");
        assert_eq!(config.execute_url(), "http://renderer:8080/execute");
        assert_eq!(config.health_url(), "http://renderer:8080/health");
    }

    #[tokio::test]
    async fn test_execute_posts_job_and_decodes_result() {
        let router = Router::new().route(
            "/execute",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["jobId"], "job-1");
                assert_eq!(body["previewUrl"], "https://preview.example.com/res-1");
                assert_eq!(body["timeoutMs"], 5000);
                Json(json!({ "status": "completed", "artifactUrl": "s3://shots/res-1.png" }))
            }),
        );
        let executor = HttpScreenshotExecutor::new(HttpExecutorConfig::new(serve(router).await));

        let config = JobConfig {
            timeout_ms: 5000,
            debug: false,
        };
        let result = executor.execute("job-1", &params(), &config).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.artifact_url.as_deref(), Some("s3://shots/res-1.png"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let router = Router::new()
            .route(
                "/execute",
                post(|| async { (StatusCode::BAD_GATEWAY, "browser crashed") }),
            )
            .route("/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let executor = HttpScreenshotExecutor::new(HttpExecutorConfig::new(serve(router).await));

        let err = executor
            .execute("job-1", &params(), &JobConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ScreenshotError::Executor(ref msg) if msg.contains("browser crashed")));
        assert!(!executor.health_check().await.unwrap());
    }
}
