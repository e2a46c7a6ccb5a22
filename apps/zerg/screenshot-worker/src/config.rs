//! Worker configuration loaded from `SCREENSHOT_*` environment variables.

use core_config::{ConfigError, FromEnv, env_or_default, env_parse};
use domain_screenshots::ScreenshotStream;
use std::time::Duration;
use stream_worker::{DEFAULT_MAX_RETRIES, WorkerConfig};

/// Settings for the screenshot worker process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenshotWorkerConfig {
    /// Failed attempts before a job is dead-lettered.
    pub max_retries: u32,
    /// Messages fetched per batch.
    pub batch_size: usize,
    /// XREADGROUP BLOCK in ms. 0 switches to polling.
    pub block_timeout_ms: u64,
    /// Poll interval in ms when not blocking.
    pub poll_interval_ms: u64,
    /// Idle time before an unacknowledged delivery is reclaimed.
    pub visibility_timeout_ms: u64,
    /// Lifetime of a deduplication key.
    pub dedup_window_secs: u64,
    /// Base URL of the rendering service.
    pub executor_url: String,
    /// Port for the health and admin server.
    pub health_port: u16,
}

impl ScreenshotWorkerConfig {
    /// Build the stream worker settings for the screenshot stream.
    pub fn worker_config(&self) -> WorkerConfig {
        let blocking = (self.block_timeout_ms > 0).then_some(self.block_timeout_ms);
        WorkerConfig::from_stream_def::<ScreenshotStream>()
            .with_max_retries(self.max_retries)
            .with_batch_size(self.batch_size)
            .with_blocking(blocking)
            .with_poll_interval_ms(self.poll_interval_ms)
            .with_visibility_timeout_ms(self.visibility_timeout_ms)
            .with_dedup_window_secs(self.dedup_window_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }
}

impl FromEnv for ScreenshotWorkerConfig {
    /// Reads with defaults:
    /// - SCREENSHOT_MAX_RETRIES: 2
    /// - SCREENSHOT_BATCH_SIZE: 10
    /// - SCREENSHOT_BLOCK_TIMEOUT_MS: 5000
    /// - SCREENSHOT_POLL_INTERVAL_MS: 1000
    /// - SCREENSHOT_VISIBILITY_TIMEOUT_MS: 300000
    /// - SCREENSHOT_DEDUP_WINDOW_SECS: 300
    /// - SCREENSHOT_EXECUTOR_URL: http://localhost:3100
    /// - SCREENSHOT_HEALTH_PORT (or HEALTH_PORT): 8083
    fn from_env() -> Result<Self, ConfigError> {
        let health_port = match std::env::var("SCREENSHOT_HEALTH_PORT") {
            Ok(_) => env_parse("SCREENSHOT_HEALTH_PORT", 8083)?,
            Err(_) => env_parse("HEALTH_PORT", 8083)?,
        };

        let config = Self {
            max_retries: env_parse("SCREENSHOT_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            batch_size: env_parse("SCREENSHOT_BATCH_SIZE", 10)?,
            block_timeout_ms: env_parse("SCREENSHOT_BLOCK_TIMEOUT_MS", 5_000)?,
            poll_interval_ms: env_parse("SCREENSHOT_POLL_INTERVAL_MS", 1_000)?,
            visibility_timeout_ms: env_parse("SCREENSHOT_VISIBILITY_TIMEOUT_MS", 300_000)?,
            dedup_window_secs: env_parse("SCREENSHOT_DEDUP_WINDOW_SECS", 300)?,
            executor_url: env_or_default("SCREENSHOT_EXECUTOR_URL", "http://localhost:3100"),
            health_port,
        };

        if config.batch_size == 0 {
            return Err(ConfigError::ParseError {
                key: "SCREENSHOT_BATCH_SIZE".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 9] = [
        "SCREENSHOT_MAX_RETRIES",
        "SCREENSHOT_BATCH_SIZE",
        "SCREENSHOT_BLOCK_TIMEOUT_MS",
        "SCREENSHOT_POLL_INTERVAL_MS",
        "SCREENSHOT_VISIBILITY_TIMEOUT_MS",
        "SCREENSHOT_DEDUP_WINDOW_SECS",
        "SCREENSHOT_EXECUTOR_URL",
        "SCREENSHOT_HEALTH_PORT",
        "HEALTH_PORT",
    ];

    #[test]
    fn test_defaults() {
        temp_env::with_vars_unset(VARS, || {
            let config = ScreenshotWorkerConfig::from_env().unwrap();
            assert_eq!(config.max_retries, 2);
            assert_eq!(config.batch_size, 10);
            assert_eq!(config.block_timeout_ms, 5_000);
            assert_eq!(config.dedup_window_secs, 300);
            assert_eq!(config.executor_url, "http://localhost:3100");
            assert_eq!(config.health_port, 8083);
        });
    }

    #[test]
    fn test_reads_overrides() {
        temp_env::with_vars(
            [
                ("SCREENSHOT_MAX_RETRIES", Some("4")),
                ("SCREENSHOT_BATCH_SIZE", Some("25")),
                ("SCREENSHOT_EXECUTOR_URL", Some("http://renderer:8080")),
                ("SCREENSHOT_HEALTH_PORT", None),
                ("HEALTH_PORT", Some("9000")),
            ],
            || {
                let config = ScreenshotWorkerConfig::from_env().unwrap();
                assert_eq!(config.max_retries, 4);
                assert_eq!(config.batch_size, 25);
                assert_eq!(config.executor_url, "http://renderer:8080");
                assert_eq!(config.health_port, 9000);
            },
        );
    }

    #[test]
    fn test_worker_port_takes_precedence() {
        temp_env::with_vars(
            [("SCREENSHOT_HEALTH_PORT", Some("8100")), ("HEALTH_PORT", Some("9000"))],
            || {
                assert_eq!(ScreenshotWorkerConfig::from_env().unwrap().health_port, 8100);
            },
        );
    }

    #[test]
    fn test_invalid_value_names_the_variable() {
        temp_env::with_var("SCREENSHOT_MAX_RETRIES", Some("many"), || {
            let err = ScreenshotWorkerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("SCREENSHOT_MAX_RETRIES"));
        });
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        temp_env::with_var("SCREENSHOT_BATCH_SIZE", Some("0"), || {
            assert!(ScreenshotWorkerConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_worker_config_mapping() {
        temp_env::with_vars_unset(VARS, || {
            let mut config = ScreenshotWorkerConfig::from_env().unwrap();
            let worker = config.worker_config();
            assert_eq!(worker.stream_name, "screenshots:jobs");
            assert_eq!(worker.consumer_group, "screenshot_workers");
            assert_eq!(worker.dlq_stream, "screenshots:dlq");
            assert_eq!(worker.blocking_timeout_ms, Some(5_000));
            assert_eq!(worker.visibility_timeout(), config.visibility_timeout());

            config.block_timeout_ms = 0;
            assert_eq!(config.worker_config().blocking_timeout_ms, None);
        });
    }
}
