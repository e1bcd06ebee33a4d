use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use crate::{
    ClaimOutcome, EventId, EventRecord, EventStoreError, InboundEvent, OrderId, RecordOutcome,
    Result, stale_cutoff, store::EventLog,
};

const EVENT_COLUMNS: &str = "event_id, event_type, order_id, payload, status, received_at, \
     processed_at, retry_count, error_message, next_attempt_at, claimed_at";

/// Unique constraints whose violation means "this event was already recorded".
const DEDUP_CONSTRAINTS: [&str; 2] = [
    "payment_events_pkey",
    "uq_payment_events_order_type_event",
];

/// PostgreSQL-backed event log.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations for every pipeline table.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<EventRecord> {
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(EventRecord {
            event_id: EventId::new(row.try_get::<String, _>("event_id")?),
            event_type: row.try_get("event_type")?,
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            payload: row.try_get("payload")?,
            status: status.parse().map_err(EventStoreError::InvalidRow)?,
            received_at: row.try_get("received_at")?,
            processed_at: row.try_get("processed_at")?,
            retry_count: u32::try_from(retry_count).map_err(|_| {
                EventStoreError::InvalidRow(format!("negative retry_count {retry_count}"))
            })?,
            error_message: row.try_get("error_message")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            claimed_at: row.try_get("claimed_at")?,
        })
    }

    /// Runs a status update that only matches rows in the expected status,
    /// turning "no row updated" into the precise error.
    async fn finish(
        &self,
        event_id: &EventId,
        action: &'static str,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<()> {
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        Err(self.status_error(event_id, action).await)
    }

    async fn status_error(&self, event_id: &EventId, action: &'static str) -> EventStoreError {
        match self.get(event_id).await {
            Ok(Some(record)) => EventStoreError::InvalidStatus {
                event_id: event_id.clone(),
                status: record.status,
                action,
            },
            Ok(None) => EventStoreError::NotFound(event_id.clone()),
            Err(e) => e,
        }
    }
}

fn retry_count_param(retry_count: u32) -> i32 {
    i32::try_from(retry_count).unwrap_or(i32::MAX)
}

#[async_trait]
impl EventLog for PostgresEventLog {
    async fn record(&self, event: InboundEvent) -> Result<RecordOutcome> {
        let event_id = event.event_id.clone();
        let sql = format!(
            "INSERT INTO payment_events (event_id, event_type, order_id, payload, status, received_at) \
             VALUES ($1, $2, $3, $4, 'received', $5) \
             RETURNING {EVENT_COLUMNS}"
        );

        let inserted = sqlx::query(&sql)
            .bind(event.event_id.as_str())
            .bind(&event.event_type)
            .bind(event.order_id.map(|id| id.as_uuid()))
            .bind(&event.payload)
            .bind(event.received_at)
            .fetch_one(&self.pool)
            .await;

        match inserted {
            Ok(row) => Ok(RecordOutcome::FirstSeen(Self::row_to_record(row)?)),
            Err(e) => {
                // The insert itself is the dedup test: a key clash means we have seen it
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err
                        .constraint()
                        .is_some_and(|c| DEDUP_CONSTRAINTS.contains(&c))
                {
                    let existing = self
                        .get(&event_id)
                        .await?
                        .ok_or_else(|| EventStoreError::NotFound(event_id.clone()))?;
                    return Ok(RecordOutcome::Duplicate(existing));
                }
                Err(EventStoreError::Database(e))
            }
        }
    }

    async fn claim(&self, event_id: &EventId, lease: Duration) -> Result<ClaimOutcome> {
        let now = Utc::now();
        let sql = format!(
            "UPDATE payment_events SET status = 'processing', claimed_at = $2 \
             WHERE event_id = $1 \
               AND (status IN ('received', 'retry_scheduled') \
                    OR (status = 'processing' AND (claimed_at IS NULL OR claimed_at < $3))) \
             RETURNING {EVENT_COLUMNS}"
        );

        let claimed = sqlx::query(&sql)
            .bind(event_id.as_str())
            .bind(now)
            .bind(stale_cutoff(now, lease))
            .fetch_optional(&self.pool)
            .await?;

        match claimed {
            Some(row) => Ok(ClaimOutcome::Claimed(Self::row_to_record(row)?)),
            None => match self.get(event_id).await? {
                Some(record) => Ok(ClaimOutcome::NotClaimable(record)),
                None => Err(EventStoreError::NotFound(event_id.clone())),
            },
        }
    }

    async fn mark_applied(&self, event_id: &EventId) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE payment_events
            SET status = 'applied', processed_at = $2, error_message = NULL,
                next_attempt_at = NULL, claimed_at = NULL
            WHERE event_id = $1 AND status = 'processing'
            "#,
        )
        .bind(event_id.as_str())
        .bind(Utc::now());

        self.finish(event_id, "mark applied", query).await
    }

    async fn mark_rejected(&self, event_id: &EventId, reason: &str) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE payment_events
            SET status = 'rejected', processed_at = $2, error_message = $3,
                next_attempt_at = NULL, claimed_at = NULL
            WHERE event_id = $1 AND status = 'processing'
            "#,
        )
        .bind(event_id.as_str())
        .bind(Utc::now())
        .bind(reason);

        self.finish(event_id, "mark rejected", query).await
    }

    async fn schedule_retry(
        &self,
        event_id: &EventId,
        retry_count: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE payment_events
            SET status = 'retry_scheduled', retry_count = $2, error_message = $3,
                next_attempt_at = $4, claimed_at = NULL
            WHERE event_id = $1 AND status = 'processing'
            "#,
        )
        .bind(event_id.as_str())
        .bind(retry_count_param(retry_count))
        .bind(error)
        .bind(next_attempt_at);

        self.finish(event_id, "schedule retry", query).await
    }

    async fn mark_exhausted(
        &self,
        event_id: &EventId,
        retry_count: u32,
        error: &str,
    ) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE payment_events
            SET status = 'exhausted', retry_count = $2, error_message = $3,
                processed_at = $4, next_attempt_at = NULL, claimed_at = NULL
            WHERE event_id = $1 AND status = 'processing'
            "#,
        )
        .bind(event_id.as_str())
        .bind(retry_count_param(retry_count))
        .bind(error)
        .bind(Utc::now());

        self.finish(event_id, "mark exhausted", query).await
    }

    async fn requeue(&self, event_id: &EventId, at: DateTime<Utc>) -> Result<EventRecord> {
        let sql = format!(
            "UPDATE payment_events \
             SET status = 'retry_scheduled', retry_count = 0, processed_at = NULL, next_attempt_at = $2 \
             WHERE event_id = $1 AND status = 'exhausted' \
             RETURNING {EVENT_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(event_id.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_record(row),
            None => Err(self.status_error(event_id, "requeue").await),
        }
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<EventRecord>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM payment_events WHERE event_id = $1");
        let row = sqlx::query(&sql)
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events \
             WHERE (status = 'retry_scheduled' AND (next_attempt_at IS NULL OR next_attempt_at <= $1)) \
                OR (status = 'received' AND received_at < $2) \
                OR (status = 'processing' AND (claimed_at IS NULL OR claimed_at < $2)) \
             ORDER BY COALESCE(next_attempt_at, received_at) ASC \
             LIMIT $3"
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(stale_cutoff(now, lease))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn exhausted(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events \
             WHERE status = 'exhausted' \
             ORDER BY received_at ASC \
             LIMIT $1"
        );

        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events \
             WHERE order_id = $1 \
             ORDER BY received_at ASC"
        );

        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
