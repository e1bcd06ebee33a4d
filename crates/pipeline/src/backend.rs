//! Bundles of storage backends the processor runs on.

use std::sync::Arc;

use domain::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository};
use event_store::{EventLog, InMemoryEventLog, PostgresEventLog};
use sqlx::PgPool;

use crate::audit::{AuditLog, InMemoryAuditLog, PostgresAuditLog};
use crate::config::PipelineConfig;
use crate::lock::{InMemoryNamedLock, NamedLock, PostgresAdvisoryLock};
use crate::notify::NotificationSink;
use crate::processor::EventProcessor;

/// The four storage capabilities the processor depends on.
pub trait Backend: Send + Sync + 'static {
    type Events: EventLog + 'static;
    type Orders: OrderRepository + 'static;
    type Lock: NamedLock + 'static;
    type Audit: AuditLog + 'static;
}

/// Everything in process memory.
pub struct InMemoryBackend;

impl Backend for InMemoryBackend {
    type Events = InMemoryEventLog;
    type Orders = InMemoryOrderRepository;
    type Lock = InMemoryNamedLock;
    type Audit = InMemoryAuditLog;
}

/// Everything in one PostgreSQL database, locks included.
pub struct PostgresBackend;

impl Backend for PostgresBackend {
    type Events = PostgresEventLog;
    type Orders = PostgresOrderRepository;
    type Lock = PostgresAdvisoryLock;
    type Audit = PostgresAuditLog;
}

impl EventProcessor<InMemoryBackend> {
    /// Creates a processor over fresh in-memory stores.
    pub fn in_memory(notifier: Arc<dyn NotificationSink>, config: PipelineConfig) -> Self {
        EventProcessor::new(
            InMemoryEventLog::new(),
            InMemoryOrderRepository::new(),
            InMemoryNamedLock::new(),
            InMemoryAuditLog::new(),
            notifier,
            config,
        )
    }
}

impl EventProcessor<PostgresBackend> {
    /// Creates a processor over one database.
    ///
    /// `lock_pool` only serves advisory locks. Each held lock pins one of its
    /// connections while the stores keep working on `pool`.
    pub fn postgres(
        pool: PgPool,
        lock_pool: PgPool,
        notifier: Arc<dyn NotificationSink>,
        config: PipelineConfig,
    ) -> Self {
        EventProcessor::new(
            PostgresEventLog::new(pool.clone()),
            PostgresOrderRepository::new(pool.clone()),
            PostgresAdvisoryLock::new(lock_pool),
            PostgresAuditLog::new(pool),
            notifier,
            config,
        )
    }
}
