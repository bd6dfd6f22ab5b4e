//! attest-orders
//!
//! Order store and matcher, the lifecycle controller that drives orders from
//! `pending` to `attested`, and the notification outbox.
//!
//! Storage backends implement [`OrderStore`] and [`Outbox`]. This crate ships
//! in-memory implementations; the Postgres ones live in `attest-db`.

mod error;
mod lifecycle;
mod memory;
mod outbox;
mod state_machine;
mod store;

pub use error::OrderError;
pub use lifecycle::{
    CreateOutcome, IssuanceClaim, Lifecycle, DEFAULT_CLAIM_TTL_SECS, MAX_CLAIM_TTL_SECS,
};
pub use memory::MemoryOrderStore;
pub use outbox::{
    DispatchReport, MemoryOutbox, NotificationSink, Outbox, OutboxDispatcher, OutboxEntry,
};
pub use state_machine::{transition, OrderEvent, TransitionError};
pub use store::{
    pick_preferred, InsertOutcome, NewOrder, OrderFilter, OrderSelector, OrderStore,
    ProviderFilter, StatusCounts,
};
