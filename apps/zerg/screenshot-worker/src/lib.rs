//! Screenshot Worker Service
//!
//! A background worker that renders screenshots for jobs queued on a Redis stream.
//!
//! ## Architecture
//!
//! ```text
//! Redis Stream (screenshots:jobs)
//!   ↓ (Consumer Group: screenshot_workers)
//! StreamWorker<ScreenshotJob, ScreenshotProcessor>
//!   ↓ (one message at a time)
//! HttpScreenshotExecutor → rendering service
//!   ↓ (retries exhausted or invalid body)
//! Redis Stream (screenshots:dlq)
//! ```
//!
//! ## Features
//!
//! - Consumer group support for horizontal scaling
//! - Bounded retries carried in the job body
//! - Dead letter queue with replay endpoints
//! - Graceful shutdown handling
//! - Health check endpoint for Kubernetes probes

pub mod config;
pub mod connection;

use axum::Router;
use config::ScreenshotWorkerConfig;
use connection::{ConnectRetry, connect_with_retry};
use core_config::{Environment, FromEnv, app_info, redis::RedisConfig};
use domain_screenshots::{
    HttpExecutorConfig, HttpScreenshotExecutor, ScreenshotJob, ScreenshotProcessor,
    ScreenshotStream,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use stream_worker::{
    DlqAdminState, DlqManager, HealthState, RedisStreamTransport, StreamDef, StreamProcessor,
    StreamWorker, full_admin_router, metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Start the health and admin HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Stream monitoring: `/stream/info`
/// - Prometheus metrics: `/metrics`
/// - DLQ admin: `/admin/dlq/*`
async fn start_health_server(app: Router, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health and admin server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the screenshot worker
///
/// 1. Sets up error reporting and structured logging
/// 2. Connects to Redis and ensures the consumer group exists
/// 3. Starts the health/admin server
/// 4. Processes batches until SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if configuration is invalid, Redis is unreachable, or the
/// worker hits a fatal error.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics().wrap_err("Failed to initialize metrics")?;

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, environment = ?environment, "Starting screenshot worker service");

    let settings =
        ScreenshotWorkerConfig::from_env().wrap_err("Failed to load worker configuration")?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to Redis...");
    let redis = connect_with_retry(&redis_config.url, ConnectRetry::default())
        .await
        .wrap_err("Failed to connect to Redis")?;
    // XREADGROUP BLOCK gets its own connection so readiness and admin calls
    // are not queued behind it
    let reader = connect_with_retry(&redis_config.url, ConnectRetry::default())
        .await
        .wrap_err("Failed to open the stream reader connection")?;
    info!("Connected to Redis successfully");

    let worker_config = settings.worker_config();
    info!(
        stream = %worker_config.stream_name,
        consumer_group = %worker_config.consumer_group,
        consumer_id = %worker_config.consumer_id,
        block_timeout_ms = ?worker_config.blocking_timeout_ms,
        batch_size = worker_config.batch_size,
        max_retries = worker_config.max_retries,
        "Worker configuration loaded"
    );

    let transport = Arc::new(
        RedisStreamTransport::new(redis.clone(), worker_config.clone()).with_reader(reader),
    );
    transport
        .init_consumer_group()
        .await
        .wrap_err("Failed to initialize consumer group")?;

    let dlq = DlqManager::new(
        redis,
        ScreenshotStream::STREAM_NAME,
        ScreenshotStream::DLQ_STREAM,
    );

    let executor = HttpScreenshotExecutor::new(HttpExecutorConfig::new(&settings.executor_url));
    let processor = ScreenshotProcessor::new(executor);
    match processor.health_check().await {
        Ok(true) => info!(executor_url = %settings.executor_url, "Rendering service reachable"),
        Ok(false) | Err(_) => {
            warn!(executor_url = %settings.executor_url, "Rendering service not reachable yet")
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(transport.clone(), app_info.name, app_info.version);
    let admin = full_admin_router::<ScreenshotJob>(health_state, DlqAdminState::new(dlq.clone()));
    let health_port = settings.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(admin, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    info!("Starting screenshot job processor...");
    let worker = StreamWorker::<ScreenshotJob, _>::new(
        transport,
        Arc::new(dlq),
        processor,
        worker_config,
    );
    worker
        .run(shutdown_rx)
        .await
        .wrap_err("Screenshot worker stopped with an error")?;

    info!("Screenshot worker service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        let mut stream = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;
        stream.recv().await;
        Ok::<_, eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
