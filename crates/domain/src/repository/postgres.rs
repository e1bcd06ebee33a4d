use async_trait::async_trait;
use chrono::Utc;
use common::{EventId, OrderId, Version};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{AppliedTransition, OrderRepository, Result, TransitionWrite};
use crate::error::RepositoryError;
use crate::order::{Order, OrderState};

/// PostgreSQL-backed order repository.
///
/// Uses the `orders` and `order_transitions` tables from the shared
/// migrations. The version guard is a single conditional `UPDATE`, so two
/// writers holding the same version can never both succeed. The transition
/// row is inserted in the same transaction.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let state: String = row.try_get("state")?;

        Ok(Order::from_parts(
            OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            state.parse().map_err(RepositoryError::InvalidRow)?,
            Version::new(row.try_get("version")?),
            row.try_get("created_at")?,
            row.try_get("updated_at")?,
        ))
    }

    fn row_to_transition(row: PgRow) -> Result<AppliedTransition> {
        let state: String = row.try_get("state")?;

        Ok(AppliedTransition {
            event_id: EventId::new(row.try_get::<String, _>("event_id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            state: state.parse().map_err(RepositoryError::InvalidRow)?,
            version: Version::new(row.try_get("version")?),
            applied_at: row.try_get("applied_at")?,
        })
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[tracing::instrument(skip(self))]
    async fn create(&self, order_id: OrderId) -> Result<Order> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, state, version, created_at, updated_at)
            VALUES ($1, $2, 0, $3, $3)
            RETURNING id, state, version, created_at, updated_at
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(OrderState::PendingPayment.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Self::row_to_order(row),
            Err(e) => {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("orders_pkey")
                {
                    return Err(RepositoryError::AlreadyExists(order_id));
                }
                Err(RepositoryError::Database(e))
            }
        }
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, state, version, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    #[tracing::instrument(skip(self), fields(expected = %expected_version, to = %new_state))]
    async fn apply_transition(
        &self,
        order_id: OrderId,
        expected_version: Version,
        new_state: OrderState,
        event_id: &EventId,
    ) -> Result<TransitionWrite> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET state = $3, version = version + 1, updated_at = $4
            WHERE id = $1 AND version = $2
            RETURNING id, state, version, created_at, updated_at
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(expected_version.as_i64())
        .bind(new_state.as_str())
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = updated {
            let order = Self::row_to_order(row)?;

            sqlx::query(
                r#"
                INSERT INTO order_transitions (event_id, order_id, state, version, applied_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(event_id.as_str())
            .bind(order_id.as_uuid())
            .bind(order.state().as_str())
            .bind(order.version().as_i64())
            .bind(order.updated_at())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("order_transitions_pkey")
                {
                    return RepositoryError::DuplicateTransition(event_id.clone());
                }
                RepositoryError::Database(e)
            })?;

            tx.commit().await?;
            return Ok(TransitionWrite::Applied(order));
        }

        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        match actual {
            Some(actual) => Ok(TransitionWrite::VersionConflict {
                actual: Version::new(actual),
            }),
            None => Err(RepositoryError::NotFound(order_id)),
        }
    }

    async fn applied_transition(&self, event_id: &EventId) -> Result<Option<AppliedTransition>> {
        let row = sqlx::query(
            r#"
            SELECT event_id, order_id, state, version, applied_at
            FROM order_transitions
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transition).transpose()
    }

    async fn transitions(&self, order_id: OrderId) -> Result<Vec<AppliedTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, order_id, state, version, applied_at
            FROM order_transitions
            WHERE order_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transition).collect()
    }
}
