//! Dead-letter inspection and requeue.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use event_store::{EventId, EventLog, EventRecord};
use pipeline::{AuditLog, AuditRecord, Backend};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct EventDetailResponse {
    pub event: EventRecord,
    pub audit: Vec<AuditRecord>,
}

/// GET /events/exhausted: events awaiting manual reconciliation.
#[tracing::instrument(skip(state, params))]
pub async fn exhausted<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<EventRecord>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let events = state.processor.events().exhausted(limit).await?;
    Ok(Json(events))
}

/// GET /events/{event_id}: one event row and its audit trail.
#[tracing::instrument(skip(state))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(event_id): Path<String>,
) -> Result<Json<EventDetailResponse>, ApiError> {
    let event_id = EventId::new(event_id);
    let event = state
        .processor
        .events()
        .get(&event_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Event {event_id} not found")))?;
    let audit = state.processor.audit_log().for_event(&event_id).await?;

    Ok(Json(EventDetailResponse { event, audit }))
}

/// POST /events/{event_id}/requeue: give an exhausted event a fresh retry budget.
#[tracing::instrument(skip(state))]
pub async fn requeue<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(event_id): Path<String>,
) -> Result<Json<EventRecord>, ApiError> {
    let record = state.processor.requeue(&EventId::new(event_id)).await?;
    Ok(Json(record))
}
