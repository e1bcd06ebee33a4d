//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{AppState, create_app};
use event_store::PostgresEventLog;
use metrics_exporter_prometheus::PrometheusHandle;
use pipeline::{
    Backend, EventProcessor, NotificationSink, RetryWorker, TracingNotificationSink,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn describe_metrics() {
    metrics::describe_counter!("pipeline_events_total", "Events handled, by outcome");
    metrics::describe_histogram!(
        "pipeline_attempt_duration_seconds",
        metrics::Unit::Seconds,
        "Duration of one processing attempt"
    );
    metrics::describe_counter!(
        "pipeline_version_conflicts_total",
        "Order writes that lost the version race"
    );
    metrics::describe_counter!(
        "pipeline_lock_timeouts_total",
        "Attempts that gave up waiting for the order lock"
    );
    metrics::describe_counter!(
        "pipeline_audit_failures_total",
        "Audit records that could not be written"
    );
    metrics::describe_counter!(
        "pipeline_notification_failures_total",
        "Notifications that failed or timed out"
    );
    metrics::describe_counter!("retry_worker_events_total", "Events re-run by the retry worker");
}

/// Runs the HTTP server and the retry worker until a shutdown signal arrives.
async fn serve<B: Backend>(
    config: &Config,
    processor: Arc<EventProcessor<B>>,
    metrics_handle: PrometheusHandle,
) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = RetryWorker::new(processor.clone(), config.worker.clone());
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let app = create_app(Arc::new(AppState::new(processor)), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "retry worker task failed");
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    describe_metrics();

    // 3. Pick the storage backend and serve
    let notifier: Arc<dyn NotificationSink> = Arc::new(TracingNotificationSink);

    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let lock_pool = PgPoolOptions::new()
                .max_connections(config.database_lock_connections)
                .connect(url)
                .await
                .expect("failed to connect lock pool");
            PostgresEventLog::new(pool.clone())
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!(
                connections = config.database_max_connections,
                lock_connections = config.database_lock_connections,
                "using PostgreSQL backend"
            );

            let processor =
                EventProcessor::postgres(pool, lock_pool, notifier, config.pipeline.clone());
            serve(&config, Arc::new(processor), metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory backend");
            let processor = EventProcessor::in_memory(notifier, config.pipeline.clone());
            serve(&config, Arc::new(processor), metrics_handle).await;
        }
    }
}
