//! Append-only audit trail of processing attempts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId};
use domain::OrderState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What happened on an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// The event id had already been handled, or is being handled right now.
    Duplicate,
    /// The order transition was persisted (or the event needed none).
    Applied,
    /// The event broke a business rule and will not be retried.
    Rejected,
    /// Concurrent writers kept winning; another attempt is scheduled.
    VersionConflict,
    /// The per-order lock was busy; another attempt is scheduled.
    LockTimeout,
    /// Another attempt is scheduled after a transient failure.
    RetryScheduled,
    /// The retry budget is spent; the event needs manual reconciliation.
    Exhausted,
    /// An operator moved an exhausted event back into the retry queue.
    Requeued,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Duplicate => "duplicate",
            AuditAction::Applied => "applied",
            AuditAction::Rejected => "rejected",
            AuditAction::VersionConflict => "version_conflict",
            AuditAction::LockTimeout => "lock_timeout",
            AuditAction::RetryScheduled => "retry_scheduled",
            AuditAction::Exhausted => "exhausted",
            AuditAction::Requeued => "requeued",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duplicate" => Ok(AuditAction::Duplicate),
            "applied" => Ok(AuditAction::Applied),
            "rejected" => Ok(AuditAction::Rejected),
            "version_conflict" => Ok(AuditAction::VersionConflict),
            "lock_timeout" => Ok(AuditAction::LockTimeout),
            "retry_scheduled" => Ok(AuditAction::RetryScheduled),
            "exhausted" => Ok(AuditAction::Exhausted),
            "requeued" => Ok(AuditAction::Requeued),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// One immutable fact about a processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: AuditAction,
    pub event_id: EventId,
    pub order_id: Option<OrderId>,
    pub resulting_state: Option<OrderState>,
    pub timestamp: DateTime<Utc>,
    pub detail: Value,
}

impl AuditRecord {
    pub fn new(action: AuditAction, event_id: EventId, order_id: Option<OrderId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            event_id,
            order_id,
            resulting_state: None,
            timestamp: Utc::now(),
            detail: Value::Object(Default::default()),
        }
    }

    pub fn with_state(mut self, state: Option<OrderState>) -> Self {
        self.resulting_state = state;
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Errors from an audit backend.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit log unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid audit row: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only log of attempts.
///
/// The processor only ever appends. The read methods exist for operators
/// reconciling an order or an event and are not on the processing path.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;

    /// Records for one event, oldest first.
    async fn for_event(&self, event_id: &EventId) -> Result<Vec<AuditRecord>, AuditError>;

    /// Records for one order, oldest first.
    async fn for_order(&self, order_id: OrderId) -> Result<Vec<AuditRecord>, AuditError>;
}

/// In-memory audit log for tests and single-node deployments.
#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    records: Arc<RwLock<Vec<AuditRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent append fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All records in append order.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    /// Number of records with the given action.
    pub async fn count(&self, action: AuditAction) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.action == action)
            .count()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable(
                "in-memory audit log switched off".to_string(),
            ));
        }
        self.records.write().await.push(record);
        Ok(())
    }

    async fn for_event(&self, event_id: &EventId) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| &r.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.order_id == Some(order_id))
            .cloned()
            .collect())
    }
}

/// PostgreSQL-backed audit log (`audit_log` table).
#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: PgRow) -> Result<AuditRecord, AuditError> {
        let action: String = row.try_get("action")?;
        let resulting_state: Option<String> = row.try_get("resulting_state")?;

        Ok(AuditRecord {
            id: row.try_get("id")?,
            action: action.parse().map_err(AuditError::InvalidRow)?,
            event_id: EventId::new(row.try_get::<String, _>("event_id")?),
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            resulting_state: resulting_state
                .map(|s| s.parse::<OrderState>())
                .transpose()
                .map_err(AuditError::InvalidRow)?,
            timestamp: row.try_get("timestamp")?,
            detail: row.try_get("detail")?,
        })
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, action, event_id, order_id, resulting_state, timestamp, detail)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.action.as_str())
        .bind(record.event_id.as_str())
        .bind(record.order_id.map(|id| id.as_uuid()))
        .bind(record.resulting_state.map(|s| s.as_str()))
        .bind(record.timestamp)
        .bind(&record.detail)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn for_event(&self, event_id: &EventId) -> Result<Vec<AuditRecord>, AuditError> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, event_id, order_id, resulting_state, timestamp, detail
            FROM audit_log
            WHERE event_id = $1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(event_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<AuditRecord>, AuditError> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, event_id, order_id, resulting_state, timestamp, detail
            FROM audit_log
            WHERE order_id = $1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
