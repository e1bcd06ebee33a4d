//! HTTP handlers.

pub mod events;
pub mod ops;
pub mod orders;
pub mod webhooks;

use std::sync::Arc;

use common::OrderId;
use pipeline::{Backend, EventProcessor};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<B: Backend> {
    pub processor: Arc<EventProcessor<B>>,
}

impl<B: Backend> AppState<B> {
    pub fn new(processor: Arc<EventProcessor<B>>) -> Self {
        Self { processor }
    }
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
