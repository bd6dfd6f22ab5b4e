use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, AttributeSet, DeviceAddress, UnitId};

/// Lifecycle events published through the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A wallet address was bound, either to `order_id` or, when no order
    /// could be resolved yet, to the endpoint session only.
    ///
    /// `bound_at` is the order's `updated_at` after the bind, so a re-bind
    /// of the same address is a distinct event.
    AddressBound {
        order_id: Option<i64>,
        device: Option<DeviceAddress>,
        address: Address,
        bound_at: DateTime<Utc>,
    },
    /// An order reached `attested`.
    Attested {
        order_id: i64,
        provider: Option<String>,
        address: Address,
        unit: UnitId,
        data: AttributeSet,
        device: Option<DeviceAddress>,
    },
}

impl Notification {
    /// Dedupe key: enqueueing the same event twice yields one outbox row.
    pub fn idempotency_key(&self) -> String {
        match self {
            Notification::AddressBound {
                order_id: Some(id),
                address,
                bound_at,
                ..
            } => format!("address_bound:{id}:{address}:{}", bound_at.timestamp_micros()),
            Notification::AddressBound {
                order_id: None,
                device: Some(device),
                address,
                bound_at,
            } => format!(
                "address_bound:device:{device}:{address}:{}",
                bound_at.timestamp_micros()
            ),
            Notification::AddressBound {
                order_id: None,
                device: None,
                address,
                bound_at,
            } => format!("address_bound:{address}:{}", bound_at.timestamp_micros()),
            Notification::Attested { order_id, .. } => format!("attested:{order_id}"),
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Notification::AddressBound { .. } => "address_bound",
            Notification::Attested { .. } => "attested",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};

    #[test]
    fn serializes_with_type_tag() {
        let address = Address::from_public_key(&[1u8; 32]);
        let bound_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let n = Notification::AddressBound {
            order_id: Some(7),
            device: None,
            address: address.clone(),
            bound_at,
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["type"], "address_bound");
        assert_eq!(v["order_id"], 7);
        assert_eq!(
            n.idempotency_key(),
            format!("address_bound:7:{address}:1700000000000000")
        );
        assert_eq!(n.topic(), "address_bound");
    }

    #[test]
    fn rebinding_the_same_address_is_a_new_event() {
        let address = Address::from_public_key(&[1u8; 32]);
        let first = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let bound = |bound_at| Notification::AddressBound {
            order_id: Some(7),
            device: None,
            address: address.clone(),
            bound_at,
        };
        assert_eq!(bound(first).idempotency_key(), bound(first).idempotency_key());
        assert_ne!(
            bound(first).idempotency_key(),
            bound(first + Duration::microseconds(1)).idempotency_key()
        );
    }
}
