//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use pipeline::{PipelineConfig, RetryPolicy, WorkerConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for structured logs, anything else for human-readable
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory stores when unset
/// - `DATABASE_MAX_CONNECTIONS` (default: `20`)
/// - `DATABASE_LOCK_CONNECTIONS`: size of the separate advisory-lock pool,
///   which caps how many orders are worked on at once (default: `16`)
/// - `PIPELINE_MAX_RETRIES` (5), `PIPELINE_BACKOFF_BASE_MS` (1000),
///   `PIPELINE_BACKOFF_MAX_MS` (300000), `PIPELINE_LOCK_TIMEOUT_MS` (2000),
///   `PIPELINE_MAX_CONFLICT_RELOADS` (3), `PIPELINE_PROCESSING_LEASE_MS` (60000),
///   `PIPELINE_NOTIFY_TIMEOUT_MS` (1000)
/// - `RETRY_WORKER_INTERVAL_MS` (1000), `RETRY_WORKER_BATCH` (100),
///   `RETRY_WORKER_CONCURRENCY` (16)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub database_lock_connections: u32,
    pub pipeline: PipelineConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            parse_var(&lookup, key)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let retry_defaults = defaults.pipeline.retry;
        let retry = RetryPolicy::new(
            parse_var(&lookup, "PIPELINE_MAX_RETRIES").unwrap_or(retry_defaults.max_retries),
            millis("PIPELINE_BACKOFF_BASE_MS", retry_defaults.base_delay),
            millis("PIPELINE_BACKOFF_MAX_MS", retry_defaults.max_delay),
        );

        let pipeline = PipelineConfig {
            retry,
            lock_timeout: millis("PIPELINE_LOCK_TIMEOUT_MS", defaults.pipeline.lock_timeout),
            max_conflict_reloads: parse_var(&lookup, "PIPELINE_MAX_CONFLICT_RELOADS")
                .unwrap_or(defaults.pipeline.max_conflict_reloads),
            processing_lease: millis(
                "PIPELINE_PROCESSING_LEASE_MS",
                defaults.pipeline.processing_lease,
            ),
            notify_timeout: millis("PIPELINE_NOTIFY_TIMEOUT_MS", defaults.pipeline.notify_timeout),
        };

        let worker = WorkerConfig {
            interval: millis("RETRY_WORKER_INTERVAL_MS", defaults.worker.interval),
            batch_size: parse_var(&lookup, "RETRY_WORKER_BATCH")
                .unwrap_or(defaults.worker.batch_size),
            concurrency: parse_var(&lookup, "RETRY_WORKER_CONCURRENCY")
                .unwrap_or(defaults.worker.concurrency),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            database_lock_connections: parse_var(&lookup, "DATABASE_LOCK_CONNECTIONS")
                .unwrap_or(defaults.database_lock_connections),
            pipeline,
            worker,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 20,
            database_lock_connections: 16,
            pipeline: PipelineConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.pipeline.retry, RetryPolicy::default());
        assert_eq!(config.worker.batch_size, 100);
        assert_eq!(config.worker.concurrency, 16);
    }

    #[test]
    fn test_pipeline_overrides() {
        let config = from_pairs(&[
            ("PIPELINE_MAX_RETRIES", "3"),
            ("PIPELINE_BACKOFF_BASE_MS", "250"),
            ("PIPELINE_LOCK_TIMEOUT_MS", "500"),
            ("RETRY_WORKER_INTERVAL_MS", "5000"),
            ("RETRY_WORKER_CONCURRENCY", "4"),
        ]);

        assert_eq!(config.pipeline.retry.max_retries, 3);
        assert_eq!(config.pipeline.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.pipeline.retry.max_delay, Duration::from_secs(300));
        assert_eq!(config.pipeline.lock_timeout, Duration::from_millis(500));
        assert_eq!(config.worker.interval, Duration::from_secs(5));
        assert_eq!(config.worker.concurrency, 4);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[("PORT", "http"), ("PIPELINE_MAX_RETRIES", "-1")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.pipeline.retry.max_retries, 5);
    }

    #[test]
    fn test_database_and_log_format() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/payments"),
            ("LOG_FORMAT", "json"),
        ]);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/payments")
        );
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_lock_connections, 16);

        assert!(from_pairs(&[("DATABASE_URL", "")]).database_url.is_none());
    }

    #[test]
    fn test_pool_sizes() {
        let config = from_pairs(&[
            ("DATABASE_MAX_CONNECTIONS", "8"),
            ("DATABASE_LOCK_CONNECTIONS", "4"),
        ]);
        assert_eq!(config.database_max_connections, 8);
        assert_eq!(config.database_lock_connections, 4);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
