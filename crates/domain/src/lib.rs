//! Domain layer for the order-payment pipeline.
//!
//! This crate provides:
//! - The order state machine and its transition table
//! - The `Order` aggregate with an optimistic version
//! - Typed provider events and their requested transitions
//! - `OrderRepository` with in-memory and PostgreSQL backends

pub mod error;
pub mod order;
pub mod repository;

pub use common::{EventId, OrderId, Version};
pub use error::{EventParseError, RepositoryError};
pub use order::{LIFECYCLE_EVENT_TYPES, Order, OrderError, OrderState, PaymentEvent, allowed};
pub use repository::{
    AppliedTransition, InMemoryOrderRepository, OrderRepository, PostgresOrderRepository,
    TransitionWrite,
};
