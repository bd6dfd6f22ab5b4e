//! In-memory [`OrderStore`].
//!
//! One mutex covers the read-check-write of a single operation and is never
//! held across an await point. Uniqueness of non-attested (provider, data)
//! is enforced under that lock, matching the partial unique index the
//! Postgres store relies on.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use attest_schemas::{Address, AttestationOrder, DeviceAddress, OrderStatus, UnitId};

use crate::store::{InsertOutcome, NewOrder, OrderFilter, OrderStore, StatusCounts};

#[derive(Debug, Clone)]
struct Row {
    order: AttestationOrder,
    claim: Option<(Uuid, DateTime<Utc>)>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    rows: BTreeMap<i64, Row>,
    mutations: u64,
}

#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    inner: Mutex<Inner>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes (inserts and conditional updates that
    /// changed a row). Tests use it to assert that a flow wrote nothing.
    pub fn mutation_count(&self) -> u64 {
        self.lock().map(|g| g.mutations).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory order store lock poisoned"))
    }
}

impl Row {
    fn claim_is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.claim.is_some_and(|(_, at)| at >= now - ttl)
    }
}

impl Inner {
    /// Run `f` on row `id` when `guard` accepts it; counts the mutation.
    /// `updated_at` advances by at least a microsecond on every write.
    fn update<G, F>(&mut self, id: i64, guard: G, f: F) -> bool
    where
        G: FnOnce(&Row) -> bool,
        F: FnOnce(&mut Row),
    {
        let Some(row) = self.rows.get_mut(&id) else {
            return false;
        };
        if !guard(row) {
            return false;
        }
        f(row);
        let floor = row.order.updated_at + Duration::microseconds(1);
        row.order.updated_at = Utc::now().max(floor);
        self.mutations += 1;
        true
    }

    /// Lease bookkeeping only: the order and the mutation count stay as-is.
    fn lease<G>(&mut self, id: i64, guard: G, claim: Option<(Uuid, DateTime<Utc>)>) -> bool
    where
        G: FnOnce(&Row) -> bool,
    {
        match self.rows.get_mut(&id) {
            Some(row) if guard(row) => {
                row.claim = claim;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get(&self, id: i64) -> Result<Option<AttestationOrder>> {
        Ok(self.lock()?.rows.get(&id).map(|r| r.order.clone()))
    }

    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<AttestationOrder>> {
        let g = self.lock()?;
        Ok(g.rows
            .values()
            .filter(|r| filter.matches(&r.order))
            .map(|r| r.order.clone())
            .collect())
    }

    async fn insert(&self, new: &NewOrder) -> Result<InsertOutcome> {
        let mut g = self.lock()?;

        let identity =
            OrderFilter::by_data(new.provider.as_deref(), new.data.clone()).non_attested();
        if g.rows.values().any(|r| identity.matches(&r.order)) {
            return Ok(InsertOutcome::Conflict);
        }

        g.next_id += 1;
        let id = g.next_id;
        let now = Utc::now();
        let order = AttestationOrder {
            id,
            provider: new.provider.clone(),
            data: new.data.clone(),
            wallet_address: new.address.clone(),
            device_address: new.device.clone(),
            unit: None,
            status: new.initial_status(),
            created_at: now,
            updated_at: now,
            attested_at: None,
        };
        g.rows.insert(
            id,
            Row {
                order: order.clone(),
                claim: None,
            },
        );
        g.mutations += 1;
        Ok(InsertOutcome::Inserted(order))
    }

    async fn bind(
        &self,
        id: i64,
        address: &Address,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut g = self.lock()?;
        Ok(g.update(
            id,
            |r| !r.order.is_attested() && !r.claim_is_live(now, ttl),
            |r| {
                r.order.wallet_address = Some(address.clone());
                r.order.status = OrderStatus::Addressed;
            },
        ))
    }

    async fn unbind(&self, id: i64, now: DateTime<Utc>, ttl: Duration) -> Result<bool> {
        let mut g = self.lock()?;
        Ok(g.update(
            id,
            |r| {
                r.order.status == OrderStatus::Addressed
                    && r.order.wallet_address.is_some()
                    && !r.claim_is_live(now, ttl)
            },
            |r| {
                r.order.wallet_address = None;
                r.order.status = OrderStatus::Pending;
            },
        ))
    }

    async fn finalize(&self, id: i64, address: &Address, unit: &UnitId) -> Result<bool> {
        let mut g = self.lock()?;
        Ok(g.update(
            id,
            |r| {
                !r.order.is_attested()
                    && r.order
                        .wallet_address
                        .as_ref()
                        .map_or(true, |bound| bound == address)
            },
            |r| {
                r.order.wallet_address = Some(address.clone());
                r.order.unit = Some(unit.clone());
                r.order.status = OrderStatus::Attested;
                r.order.attested_at = Some(Utc::now());
                r.claim = None;
            },
        ))
    }

    async fn set_device(&self, id: i64, device: &DeviceAddress) -> Result<bool> {
        let mut g = self.lock()?;
        Ok(g.update(
            id,
            |r| !r.order.is_attested(),
            |r| r.order.device_address = Some(device.clone()),
        ))
    }

    async fn claim_issuance(
        &self,
        id: i64,
        address: &Address,
        token: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut g = self.lock()?;
        Ok(g.lease(
            id,
            |r| {
                !r.order.is_attested()
                    && r.order.wallet_address.as_ref().map_or(true, |b| b == address)
                    && !r.claim_is_live(now, ttl)
            },
            Some((token, now)),
        ))
    }

    async fn release_issuance(&self, id: i64, token: Uuid) -> Result<bool> {
        let mut g = self.lock()?;
        Ok(g.lease(
            id,
            |r| matches!(r.claim, Some((t, _)) if t == token),
            None,
        ))
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        let g = self.lock()?;
        let mut counts = StatusCounts::default();
        for r in g.rows.values() {
            counts.add(r.order.status, 1);
        }
        Ok(counts)
    }
}
