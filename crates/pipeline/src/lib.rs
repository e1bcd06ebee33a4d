//! Idempotent order-payment event pipeline.
//!
//! Provider events are deduplicated by the event log, serialized per order
//! by a named lock, validated against the order state machine, written with
//! an optimistic version guard, retried with exponential backoff on
//! transient failures, and audited once per attempt.
//!
//! The pipeline runs on [`InMemoryBackend`] or [`PostgresBackend`]; the
//! [`RetryWorker`] re-runs events whose backoff has elapsed.

pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod lock;
pub mod notify;
pub mod outcome;
pub mod processor;
pub mod retry;
pub mod worker;

pub use audit::{AuditAction, AuditError, AuditLog, AuditRecord, InMemoryAuditLog, PostgresAuditLog};
pub use backend::{Backend, InMemoryBackend, PostgresBackend};
pub use config::{PipelineConfig, WorkerConfig};
pub use error::ProcessingError;
pub use lock::{
    InMemoryNamedLock, LockError, LockKey, NamedLock, PostgresAdvisoryLock, with_order_lock,
};
pub use notify::{
    InMemoryNotificationSink, Notification, NotificationError, NotificationOutcome,
    NotificationSink, TracingNotificationSink,
};
pub use outcome::Outcome;
pub use processor::EventProcessor;
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{RetryWorker, SweepReport};
