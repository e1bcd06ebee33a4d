//! Provider webhook ingestion.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use event_store::{EventId, InboundEvent};
use pipeline::{Backend, Outcome};
use serde::Serialize;

use super::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub event_id: EventId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Result code the transport answers the provider with.
///
/// Duplicates and applied events are both a success for the provider;
/// `503` asks it to redeliver, the rest must not be redelivered.
pub fn status_for(outcome: &Outcome) -> StatusCode {
    match outcome {
        Outcome::Duplicate { .. } | Outcome::Applied { .. } => StatusCode::OK,
        Outcome::Rejected { .. } => StatusCode::CONFLICT,
        Outcome::RetryScheduled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Outcome::Exhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /webhooks/events: run one authenticated event through the pipeline.
#[tracing::instrument(
    skip(state, event),
    fields(event_id = %event.event_id, event_type = %event.event_type)
)]
pub async fn ingest<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Json(event): Json<InboundEvent>,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiError> {
    if event.event_id.as_str().is_empty() {
        return Err(ApiError::BadRequest("event_id must not be empty".to_string()));
    }
    if event.event_type.is_empty() {
        return Err(ApiError::BadRequest("event_type must not be empty".to_string()));
    }

    let event_id = event.event_id.clone();
    let outcome = state.processor.process(event).await?;

    Ok((
        status_for(&outcome),
        Json(WebhookResponse { event_id, outcome }),
    ))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use event_store::EventStatus;

    use super::*;

    #[test]
    fn test_status_codes() {
        let duplicate = Outcome::Duplicate {
            status: EventStatus::Applied,
        };
        let applied = Outcome::Applied {
            state: None,
            version: None,
        };
        let rejected = Outcome::Rejected {
            reason: "illegal".to_string(),
        };
        let retry = Outcome::RetryScheduled {
            retry_count: 1,
            next_attempt_at: Utc::now(),
            error: "down".to_string(),
        };
        let exhausted = Outcome::Exhausted {
            retry_count: 5,
            error: "down".to_string(),
        };

        assert_eq!(status_for(&duplicate), StatusCode::OK);
        assert_eq!(status_for(&applied), StatusCode::OK);
        assert_eq!(status_for(&rejected), StatusCode::CONFLICT);
        assert_eq!(status_for(&retry), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&exhausted), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
