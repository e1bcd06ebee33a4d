//! Durable log of provider events, keyed for deduplication.
//!
//! Every inbound event is recorded here before any order is touched, and its
//! processing status (`received → processing → applied | rejected |
//! retry_scheduled | exhausted`) lives on the same row.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{EventId, OrderId};
pub use error::{EventStoreError, Result};
pub use event::{
    ClaimOutcome, EventRecord, EventStatus, InboundEvent, RecordOutcome, stale_cutoff,
};
pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use store::EventLog;
