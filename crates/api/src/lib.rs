//! HTTP surface of the order-payment pipeline.
//!
//! Accepts authenticated provider events on `/webhooks/events` and answers
//! with the result code of the pipeline outcome. Operator routes expose
//! dead-lettered events, audit trails and orders, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use pipeline::{
    Backend, EventProcessor, InMemoryBackend, NotificationSink, PipelineConfig,
    TracingNotificationSink,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<B: Backend>(state: Arc<AppState<B>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health::<B>))
        .route("/webhooks/events", post(routes::webhooks::ingest::<B>))
        .route("/events/exhausted", get(routes::events::exhausted::<B>))
        .route("/events/{event_id}", get(routes::events::get::<B>))
        .route(
            "/events/{event_id}/requeue",
            post(routes::events::requeue::<B>),
        )
        .route("/orders", post(routes::orders::create::<B>))
        .route("/orders/{id}", get(routes::orders::get::<B>))
        .route("/orders/{id}/events", get(routes::orders::events::<B>))
        .route("/orders/{id}/audit", get(routes::orders::audit::<B>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over in-memory stores with the given sink.
pub fn create_in_memory_state(
    notifier: Arc<dyn NotificationSink>,
    config: PipelineConfig,
) -> Arc<AppState<InMemoryBackend>> {
    let processor = EventProcessor::in_memory(notifier, config);
    Arc::new(AppState::new(Arc::new(processor)))
}

/// Creates in-memory application state that logs notifications.
pub fn create_default_state() -> Arc<AppState<InMemoryBackend>> {
    create_in_memory_state(Arc::new(TracingNotificationSink), PipelineConfig::default())
}
