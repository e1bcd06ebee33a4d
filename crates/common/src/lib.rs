//! Shared identifier types for the order-payment pipeline.

mod types;

pub use types::{EventId, OrderId, Version};
