//! Storage seam and matcher.
//!
//! Matching is whole-set equality on the canonical attribute set: an order
//! matches a data filter only when every pair corresponds exactly and both
//! sets have the same size. Backends may narrow candidates by
//! `AttributeSet::canonical_hash` but must re-check with [`OrderFilter::matches`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use attest_schemas::{
    Address, AttestationOrder, AttributeSet, DeviceAddress, OrderStatus, UnitId,
};

/// Three-valued provider filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProviderFilter {
    /// Any provider, including none.
    #[default]
    Any,
    /// Only orders without a provider.
    Unscoped,
    /// Only orders under this provider.
    Named(String),
}

impl ProviderFilter {
    /// `Some(p)` → `Named(p)`, `None` → `Unscoped`.
    pub fn exact(provider: Option<&str>) -> Self {
        match provider {
            Some(p) => ProviderFilter::Named(p.to_string()),
            None => ProviderFilter::Unscoped,
        }
    }

    pub fn matches(&self, provider: Option<&str>) -> bool {
        match self {
            ProviderFilter::Any => true,
            ProviderFilter::Unscoped => provider.is_none(),
            ProviderFilter::Named(p) => provider == Some(p.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub provider: ProviderFilter,
    pub data: Option<AttributeSet>,
    pub address: Option<Address>,
    pub id: Option<i64>,
    pub device: Option<DeviceAddress>,
    pub exclude_attested: bool,
}

impl OrderFilter {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Exact (provider, data) identity.
    pub fn by_data(provider: Option<&str>, data: AttributeSet) -> Self {
        Self {
            provider: ProviderFilter::exact(provider),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn by_device(device: DeviceAddress) -> Self {
        Self {
            device: Some(device),
            ..Self::default()
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn non_attested(mut self) -> Self {
        self.exclude_attested = true;
        self
    }

    pub fn matches(&self, order: &AttestationOrder) -> bool {
        if let Some(id) = self.id {
            if order.id != id {
                return false;
            }
        }
        if !self.provider.matches(order.provider.as_deref()) {
            return false;
        }
        if let Some(data) = &self.data {
            // BTreeMap equality: same size and every pair identical.
            if &order.data != data {
                return false;
            }
        }
        if let Some(address) = &self.address {
            if order.wallet_address.as_ref() != Some(address) {
                return false;
            }
        }
        if let Some(device) = &self.device {
            if order.device_address.as_ref() != Some(device) {
                return false;
            }
        }
        if self.exclude_attested && order.is_attested() {
            return false;
        }
        true
    }
}

/// How a lifecycle operation names its target order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSelector {
    Id(i64),
    Data {
        provider: Option<String>,
        data: AttributeSet,
    },
    /// The endpoint's most recent order.
    Device(DeviceAddress),
}

impl OrderSelector {
    pub fn to_filter(&self) -> OrderFilter {
        match self {
            OrderSelector::Id(id) => OrderFilter::by_id(*id),
            OrderSelector::Data { provider, data } => {
                OrderFilter::by_data(provider.as_deref(), data.clone())
            }
            OrderSelector::Device(d) => OrderFilter::by_device(d.clone()),
        }
    }
}

/// Resolve a candidate list to at most one order: non-attested rows win,
/// then the newest id.
pub fn pick_preferred(orders: Vec<AttestationOrder>) -> Option<AttestationOrder> {
    orders
        .into_iter()
        .max_by_key(|o| (!o.is_attested(), o.id))
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub provider: Option<String>,
    pub data: AttributeSet,
    pub address: Option<Address>,
    pub device: Option<DeviceAddress>,
}

impl NewOrder {
    pub fn new(provider: Option<String>, data: AttributeSet) -> Self {
        Self {
            provider,
            data,
            address: None,
            device: None,
        }
    }

    pub fn initial_status(&self) -> OrderStatus {
        if self.address.is_some() {
            OrderStatus::Addressed
        } else {
            OrderStatus::Pending
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(AttestationOrder),
    /// A non-attested order with the same (provider, data) already exists.
    Conflict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub addressed: i64,
    pub attested: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: OrderStatus, n: i64) {
        match status {
            OrderStatus::Pending => self.pending += n,
            OrderStatus::Addressed => self.addressed += n,
            OrderStatus::Attested => self.attested += n,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.addressed + self.attested
    }
}

/// Persistence seam for attestation orders.
///
/// Every mutating method is a conditional update guarded by the current
/// status. It returns `true` when a row changed; `false` means the guard
/// rejected it and the caller should re-read to report why.
///
/// An issuance claim is live while it was taken at or after `now - ttl`.
/// Address writes are refused under a live claim, and taking or dropping a
/// claim leaves the order itself (including `updated_at`) untouched.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<AttestationOrder>>;

    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<AttestationOrder>>;

    async fn find_order(&self, filter: &OrderFilter) -> Result<Option<AttestationOrder>> {
        Ok(pick_preferred(self.find_orders(filter).await?))
    }

    async fn insert(&self, order: &NewOrder) -> Result<InsertOutcome>;

    /// Guard: `status <> attested` and no live claim.
    async fn bind(
        &self,
        id: i64,
        address: &Address,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool>;

    /// Guard: `status = addressed`, an address is bound and no live claim.
    async fn unbind(&self, id: i64, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<bool>;

    /// Guard: `status <> attested` and the bound address is absent or equal.
    async fn finalize(&self, id: i64, address: &Address, unit: &UnitId) -> Result<bool>;

    /// Guard: `status <> attested`.
    async fn set_device(&self, id: i64, device: &DeviceAddress) -> Result<bool>;

    /// Guard: `status <> attested`, the bound address is absent or equal,
    /// and no live claim.
    async fn claim_issuance(
        &self,
        id: i64,
        address: &Address,
        token: Uuid,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool>;

    /// Guard: the claim token matches.
    async fn release_issuance(&self, id: i64, token: Uuid) -> Result<bool>;

    async fn count_by_status(&self) -> Result<StatusCounts>;
}
