use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, AttributeSet, DeviceAddress};

/// Lifecycle status of an attestation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// No wallet address bound.
    Pending,
    /// Wallet address bound, no unit yet.
    Addressed,
    /// Unit issued. **Terminal.**
    Attested,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Addressed => "addressed",
            OrderStatus::Attested => "attested",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "addressed" => Some(OrderStatus::Addressed),
            "attested" => Some(OrderStatus::Attested),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Attested)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque receipt id returned by the issuance service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted attestation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationOrder {
    pub id: i64,
    pub provider: Option<String>,
    pub data: AttributeSet,
    pub wallet_address: Option<Address>,
    pub device_address: Option<DeviceAddress>,
    pub unit: Option<UnitId>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attested_at: Option<DateTime<Utc>>,
}

impl AttestationOrder {
    pub fn is_attested(&self) -> bool {
        self.status == OrderStatus::Attested
    }

    /// Check the status/field invariants:
    /// - attested  ⟺ unit ∧ wallet
    /// - addressed ⟺ wallet ∧ ¬unit
    /// - pending   ⟺ ¬wallet
    pub fn check_invariants(&self) -> Result<(), String> {
        let wallet = self.wallet_address.is_some();
        let unit = self.unit.is_some();
        let ok = match self.status {
            OrderStatus::Attested => wallet && unit,
            OrderStatus::Addressed => wallet && !unit,
            OrderStatus::Pending => !wallet && !unit,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "order {} violates status invariant: status={} wallet={} unit={}",
                self.id, self.status, wallet, unit
            ))
        }
    }
}
