//! Order status transition table.
//!
//! ```text
//!              Bind                 Finalize
//!   Pending ─────────► Addressed ─────────────► Attested (term.)
//!      ▲                   │
//!      └───── Unbind ──────┘
//!
//!   Pending ──────────── Finalize ────────────► Attested
//! ```
//!
//! `SetDevice` is a pointer update legal in any non-terminal status and does
//! not change the status. Every store backend guards its conditional updates
//! with the same predicates, so this table is the single description of what
//! is legal.

use attest_schemas::OrderStatus;

/// Events that drive an order's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Bind,
    Unbind,
    Finalize,
    SetDevice,
}

/// Returned when an event cannot legally be applied in the current status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal order transition: {from} + {event:?}")]
pub struct TransitionError {
    pub from: OrderStatus,
    pub event: OrderEvent,
}

/// Apply `event` to `from`, returning the resulting status.
pub fn transition(from: OrderStatus, event: OrderEvent) -> Result<OrderStatus, TransitionError> {
    use OrderEvent::*;
    use OrderStatus::*;

    let next = match (from, event) {
        (Pending | Addressed, Bind) => Addressed,
        (Addressed, Unbind) => Pending,
        (Pending | Addressed, Finalize) => Attested,
        (Pending | Addressed, SetDevice) => from,
        (from, event) => return Err(TransitionError { from, event }),
    };
    Ok(next)
}
