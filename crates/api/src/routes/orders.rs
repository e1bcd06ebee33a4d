//! Order creation and lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, Version};
use domain::{Order, OrderRepository, OrderState};
use event_store::{EventLog, EventRecord};
use pipeline::{AuditLog, AuditRecord, Backend};
use serde::{Deserialize, Serialize};

use super::{AppState, parse_order_id};
use crate::error::ApiError;

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CreateOrderRequest {
    /// Caller-chosen id, e.g. the id the marketplace already uses for the sale.
    pub order_id: Option<String>,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub state: OrderState,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id(),
            state: order.state(),
            version: order.version(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

/// POST /orders: create an order at `pending_payment`.
#[tracing::instrument(skip(state, req))]
pub async fn create<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order_id = match req.order_id.as_deref() {
        Some(id) => parse_order_id(id)?,
        None => OrderId::new(),
    };

    let order = state.processor.orders().create(order_id).await?;
    tracing::info!(%order_id, "order created");

    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders/{id}: load an order.
#[tracing::instrument(skip(state))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .processor
        .orders()
        .load(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(order.into()))
}

/// GET /orders/{id}/events: every event recorded for an order.
#[tracing::instrument(skip(state))]
pub async fn events<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventRecord>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let events = state.processor.events().events_for_order(order_id).await?;
    Ok(Json(events))
}

/// GET /orders/{id}/audit: the order's audit trail.
#[tracing::instrument(skip(state))]
pub async fn audit<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let records = state.processor.audit_log().for_order(order_id).await?;
    Ok(Json(records))
}
