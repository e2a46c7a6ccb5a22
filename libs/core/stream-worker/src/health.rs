//! Health check handlers for stream workers.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Queue monitoring (`/stream/info`)
//! - Prometheus metrics (`/metrics`)
//! - DLQ admin endpoints (`/admin/dlq/*`)

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dlq::DlqManager;
use crate::metrics;
use crate::registry::StreamJob;
use crate::transport::QueueTransport;

type ApiError = (StatusCode, Json<Value>);

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

fn not_found(message_id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Message not found in DLQ",
            "message_id": message_id
        })),
    )
}

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Queue the worker reads from.
    pub transport: Arc<dyn QueueTransport>,
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
}

impl HealthState {
    /// Create a new health state.
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Shared state for DLQ admin endpoints.
///
/// `J` is the job type stored in the DLQ, needed to reset it on replay.
pub struct DlqAdminState<J> {
    pub dlq: DlqManager,
    _job: PhantomData<fn() -> J>,
}

impl<J> DlqAdminState<J> {
    pub fn new(dlq: DlqManager) -> Self {
        Self {
            dlq,
            _job: PhantomData,
        }
    }
}

impl<J> Clone for DlqAdminState<J> {
    fn clone(&self) -> Self {
        Self::new(self.dlq.clone())
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: String,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Checks that the queue transport answers.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    match state.transport.ping().await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "queue": "ok" }
            })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "queue": format!("error: {}", e) }
            })),
        )),
    }
}

/// Queue info handler for monitoring.
///
/// Returns queue depth, pending and delayed counts.
pub async fn stream_info_handler(
    State(state): State<HealthState>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .transport
        .info()
        .await
        .map(Json)
        .map_err(internal_error)
}

/// Prometheus metrics endpoint handler.
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

// ============================================================================
// DLQ Admin Handlers
// ============================================================================

/// Query parameters for DLQ list endpoint.
#[derive(Debug, Deserialize)]
pub struct DlqListParams {
    /// Maximum number of messages to return (default: 10, max: 100)
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Number of messages to skip for pagination (default: 0)
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    10
}

/// Get DLQ statistics.
///
/// `GET /admin/dlq/stats`
pub async fn dlq_stats_handler<J: StreamJob>(
    State(state): State<DlqAdminState<J>>,
) -> Result<impl IntoResponse, ApiError> {
    state.dlq.stats().await.map(Json).map_err(internal_error)
}

/// List messages in the DLQ.
///
/// `GET /admin/dlq/messages?limit=10&offset=0`
pub async fn dlq_list_handler<J: StreamJob>(
    State(state): State<DlqAdminState<J>>,
    Query(params): Query<DlqListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.min(100);

    let messages = state
        .dlq
        .list(limit, params.offset)
        .await
        .map_err(internal_error)?;

    Ok(Json(json!({
        "count": messages.len(),
        "messages": messages,
        "limit": limit,
        "offset": params.offset,
    })))
}

/// Put a dead-lettered job back on the source stream with a fresh retry budget.
///
/// `POST /admin/dlq/replay/{id}`
pub async fn dlq_replay_handler<J: StreamJob>(
    State(state): State<DlqAdminState<J>>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.dlq.replay::<J>(&message_id).await {
        Ok(Some(stream_id)) => Ok(Json(json!({
            "success": true,
            "message_id": message_id,
            "stream_id": stream_id,
            "message": "Message requeued for processing"
        }))),
        Ok(None) => Err(not_found(&message_id)),
        Err(e) if e.category() == crate::error::ErrorCategory::Permanent => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": e.to_string(), "message_id": message_id })),
        )),
        Err(e) => Err(internal_error(e)),
    }
}

/// Delete a single message from the DLQ.
///
/// `DELETE /admin/dlq/{id}`
pub async fn dlq_delete_handler<J: StreamJob>(
    State(state): State<DlqAdminState<J>>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.dlq.delete(&message_id).await {
        Ok(true) => Ok(Json(json!({
            "success": true,
            "message_id": message_id,
            "message": "Message deleted from DLQ"
        }))),
        Ok(false) => Err(not_found(&message_id)),
        Err(e) => Err(internal_error(e)),
    }
}

/// Delete every message in the DLQ.
///
/// `DELETE /admin/dlq/all`
pub async fn dlq_purge_handler<J: StreamJob>(
    State(state): State<DlqAdminState<J>>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state.dlq.purge().await.map_err(internal_error)?;
    Ok(Json(json!({
        "success": true,
        "purged_count": count,
    })))
}

/// Create a standard health router.
///
/// - `/health`, `/healthz` - Liveness probe
/// - `/ready`, `/readyz` - Readiness probe
/// - `/stream/info` - Queue monitoring
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/stream/info", get(stream_info_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Create a router with DLQ admin endpoints.
///
/// - `GET /admin/dlq/stats` - DLQ statistics
/// - `GET /admin/dlq/messages` - List DLQ messages
/// - `POST /admin/dlq/replay/{id}` - Replay a single message
/// - `DELETE /admin/dlq/{id}` - Delete a single message
/// - `DELETE /admin/dlq/all` - Delete all messages
pub fn dlq_admin_router<J: StreamJob + 'static>(state: DlqAdminState<J>) -> axum::Router {
    use axum::routing::{delete, get, post};

    axum::Router::new()
        .route("/admin/dlq/stats", get(dlq_stats_handler::<J>))
        .route("/admin/dlq/messages", get(dlq_list_handler::<J>))
        .route("/admin/dlq/replay/{id}", post(dlq_replay_handler::<J>))
        .route("/admin/dlq/all", delete(dlq_purge_handler::<J>))
        .route("/admin/dlq/{id}", delete(dlq_delete_handler::<J>))
        .with_state(state)
}

/// Create a full router with health and DLQ admin endpoints.
pub fn full_admin_router<J: StreamJob + 'static>(
    health: HealthState,
    dlq: DlqAdminState<J>,
) -> axum::Router {
    health_router(health).merge(dlq_admin_router(dlq))
}
