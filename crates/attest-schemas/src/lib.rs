//! attest-schemas
//!
//! Shared data model for the attestation service: attribute sets, ledger
//! addresses, order rows and the notifications emitted when an order moves
//! through its lifecycle. No I/O lives here.

mod address;
mod attributes;
mod notification;
mod order;

pub use address::{Address, AddressError, DeviceAddress, ADDRESS_LEN};
pub use attributes::{AttributeError, AttributeSet, DEFAULT_MAX_ATTRIBUTES};
pub use notification::Notification;
pub use order::{AttestationOrder, OrderStatus, UnitId};
