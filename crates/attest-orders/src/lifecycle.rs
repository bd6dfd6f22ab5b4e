//! Lifecycle controller.
//!
//! Every transition is validated against the status table first, then
//! written with a guarded update. A rejected update is never retried
//! blindly: the controller re-reads the row and reports the precise reason.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use attest_schemas::{
    Address, AttestationOrder, DeviceAddress, Notification, OrderStatus, UnitId,
};

use crate::error::OrderError;
use crate::outbox::Outbox;
use crate::state_machine::{transition, OrderEvent};
use crate::store::{
    InsertOutcome, NewOrder, OrderFilter, OrderSelector, OrderStore, StatusCounts,
};

pub const DEFAULT_CLAIM_TTL_SECS: u64 = 120;

/// Longest issuance lease a caller may configure.
pub const MAX_CLAIM_TTL_SECS: u64 = 86_400;

/// Bounded retries when a concurrent insert wins the unique index.
const CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOutcome {
    pub id: i64,
    /// `false` when an existing order was returned.
    pub created: bool,
}

/// A transient lease on an order's issuance step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceClaim {
    pub order_id: i64,
    pub address: Address,
    pub token: Uuid,
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn OrderStore>,
    outbox: Arc<dyn Outbox>,
    claim_ttl: chrono::Duration,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn OrderStore>, outbox: Arc<dyn Outbox>) -> Self {
        Self {
            store,
            outbox,
            claim_ttl: claim_ttl(DEFAULT_CLAIM_TTL_SECS),
        }
    }

    /// Clamped to `1..=MAX_CLAIM_TTL_SECS`.
    pub fn with_claim_ttl_secs(mut self, secs: u64) -> Self {
        self.claim_ttl = claim_ttl(secs);
        self
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        self.claim_ttl
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub async fn get_order(&self, id: i64) -> Result<AttestationOrder, OrderError> {
        self.store.get(id).await?.ok_or(OrderError::OrderNotFound)
    }

    pub async fn find_order(
        &self,
        filter: &OrderFilter,
    ) -> Result<Option<AttestationOrder>, OrderError> {
        Ok(self.store.find_order(filter).await?)
    }

    pub async fn find_orders(
        &self,
        filter: &OrderFilter,
    ) -> Result<Vec<AttestationOrder>, OrderError> {
        Ok(self.store.find_orders(filter).await?)
    }

    pub async fn counts(&self) -> Result<StatusCounts, OrderError> {
        Ok(self.store.count_by_status().await?)
    }

    /// Get-or-create keyed on (provider, canonical data).
    ///
    /// With `allow_duplicates` an existing non-attested match is returned
    /// as-is; without it the match is reported as `ALREADY_EXISTS`.
    pub async fn create_order(
        &self,
        new: NewOrder,
        allow_duplicates: bool,
    ) -> Result<CreateOutcome, OrderError> {
        let identity =
            OrderFilter::by_data(new.provider.as_deref(), new.data.clone()).non_attested();

        for attempt in 1..=CREATE_ATTEMPTS {
            if let Some(existing) = self.store.find_order(&identity).await? {
                if allow_duplicates {
                    return Ok(CreateOutcome {
                        id: existing.id,
                        created: false,
                    });
                }
                return Err(OrderError::AlreadyExists {
                    id: existing.id,
                    status: existing.status,
                    unit: existing.unit,
                });
            }

            match self.store.insert(&new).await? {
                InsertOutcome::Inserted(order) => {
                    tracing::info!(
                        order_id = order.id,
                        provider = order.provider.as_deref().unwrap_or("-"),
                        status = %order.status,
                        "order created"
                    );
                    return Ok(CreateOutcome {
                        id: order.id,
                        created: true,
                    });
                }
                InsertOutcome::Conflict => {
                    tracing::debug!(attempt, "create_order lost insert race; re-reading");
                }
            }
        }

        Err(OrderError::Store(anyhow!(
            "create_order: unique conflict persisted after {CREATE_ATTEMPTS} attempts"
        )))
    }

    /// Bind `address` to the selected non-attested order. Refused with
    /// `ISSUANCE_IN_PROGRESS` while another flow holds the issuance lease.
    pub async fn bind_address(
        &self,
        selector: &OrderSelector,
        address: &Address,
    ) -> Result<AttestationOrder, OrderError> {
        let order = self
            .store
            .find_order(&selector.to_filter())
            .await?
            .ok_or(OrderError::AddressNotFound)?;
        if transition(order.status, OrderEvent::Bind).is_err() {
            return Err(already_attested(&order));
        }

        if !self
            .store
            .bind(order.id, address, Utc::now(), self.claim_ttl)
            .await?
        {
            // Not attested and still present: the lease was the guard that failed.
            let busy = OrderError::IssuanceInProgress { id: order.id };
            return Err(self.explain(order.id, busy).await);
        }

        let bound = self.get_order(order.id).await?;
        tracing::info!(order_id = bound.id, address = %address, "address bound");
        self.notify(&Notification::AddressBound {
            order_id: Some(bound.id),
            device: bound.device_address.clone(),
            address: address.clone(),
            bound_at: bound.updated_at,
        })
        .await?;
        Ok(bound)
    }

    /// Clear the bound address of the selected `addressed` order. Refused
    /// with `ISSUANCE_IN_PROGRESS` while the issuance lease is live.
    pub async fn unbind_address(
        &self,
        selector: &OrderSelector,
    ) -> Result<AttestationOrder, OrderError> {
        let order = self
            .store
            .find_order(&selector.to_filter())
            .await?
            .ok_or(OrderError::AddressNotFound)?;
        if order.is_attested() {
            return Err(already_attested(&order));
        }
        if transition(order.status, OrderEvent::Unbind).is_err() || order.wallet_address.is_none()
        {
            return Err(OrderError::AddressNotFound);
        }

        if !self
            .store
            .unbind(order.id, Utc::now(), self.claim_ttl)
            .await?
        {
            return Err(match self.store.get(order.id).await {
                Ok(Some(o)) if o.is_attested() => already_attested(&o),
                Ok(Some(o)) if is_bound(&o) => OrderError::IssuanceInProgress { id: o.id },
                Ok(Some(_)) => OrderError::AddressNotFound,
                Ok(None) => OrderError::OrderNotFound,
                Err(e) => OrderError::Store(e),
            });
        }

        tracing::info!(order_id = order.id, "address unbound");
        self.get_order(order.id).await
    }

    /// Terminal transition. Only the first concurrent caller commits; later
    /// callers get `ALREADY_ATTESTED` carrying the persisted unit.
    pub async fn finalize(
        &self,
        selector: &OrderSelector,
        address: &Address,
        unit: &UnitId,
    ) -> Result<AttestationOrder, OrderError> {
        let order = self
            .store
            .find_order(&selector.to_filter())
            .await?
            .ok_or(OrderError::OrderNotFound)?;
        if transition(order.status, OrderEvent::Finalize).is_err() {
            return Err(already_attested(&order));
        }
        if let Some(bound) = &order.wallet_address {
            if bound != address {
                return Err(OrderError::MismatchAddress { id: order.id });
            }
        }

        if !self.store.finalize(order.id, address, unit).await? {
            let fallback = OrderError::MismatchAddress { id: order.id };
            return Err(self.explain(order.id, fallback).await);
        }

        let attested = self.get_order(order.id).await?;
        tracing::info!(
            order_id = attested.id,
            address = %address,
            unit = %unit,
            "order attested"
        );
        self.notify(&Notification::Attested {
            order_id: attested.id,
            provider: attested.provider.clone(),
            address: address.clone(),
            unit: unit.clone(),
            data: attested.data.clone(),
            device: attested.device_address.clone(),
        })
        .await?;
        Ok(attested)
    }

    /// Administrative device-pointer update; pre-attestation only.
    pub async fn rebind_device_address(
        &self,
        order_id: i64,
        device: &DeviceAddress,
    ) -> Result<AttestationOrder, OrderError> {
        let order = self.get_order(order_id).await?;
        if transition(order.status, OrderEvent::SetDevice).is_err() {
            return Err(already_attested(&order));
        }
        if !self.store.set_device(order_id, device).await? {
            return Err(self.explain(order_id, OrderError::OrderNotFound).await);
        }
        tracing::info!(order_id, device = %device, "device pointer updated");
        self.get_order(order_id).await
    }

    /// Take the issuance lease for `order_id`. A live lease held by another
    /// flow fails `ISSUANCE_IN_PROGRESS`.
    pub async fn claim_issuance(
        &self,
        order_id: i64,
        address: &Address,
    ) -> Result<IssuanceClaim, OrderError> {
        let order = self.get_order(order_id).await?;
        if order.is_attested() {
            return Err(already_attested(&order));
        }
        if let Some(bound) = &order.wallet_address {
            if bound != address {
                return Err(OrderError::MismatchAddress { id: order_id });
            }
        }

        let token = Uuid::new_v4();
        if !self
            .store
            .claim_issuance(order_id, address, token, Utc::now(), self.claim_ttl)
            .await?
        {
            return Err(match self.store.get(order_id).await {
                Ok(Some(o)) if o.is_attested() => already_attested(&o),
                Ok(Some(o)) if o.wallet_address.as_ref().is_some_and(|b| b != address) => {
                    OrderError::MismatchAddress { id: order_id }
                }
                Ok(Some(_)) => OrderError::IssuanceInProgress { id: order_id },
                Ok(None) => OrderError::OrderNotFound,
                Err(e) => OrderError::Store(e),
            });
        }
        Ok(IssuanceClaim {
            order_id,
            address: address.clone(),
            token,
        })
    }

    /// Drop a lease after a failed issuance so a retry can proceed.
    pub async fn release_issuance(&self, claim: &IssuanceClaim) -> Result<(), OrderError> {
        if !self.store.release_issuance(claim.order_id, claim.token).await? {
            tracing::debug!(order_id = claim.order_id, "issuance claim already gone");
        }
        Ok(())
    }

    /// Announce an address claimed by an endpoint that has no bindable order
    /// yet. Nothing is written to the order store.
    pub async fn record_endpoint_address(
        &self,
        device: &DeviceAddress,
        address: &Address,
        claimed_at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        tracing::info!(device = %device, address = %address, "endpoint address recorded");
        self.notify(&Notification::AddressBound {
            order_id: None,
            device: Some(device.clone()),
            address: address.clone(),
            bound_at: claimed_at,
        })
        .await
    }

    async fn notify(&self, n: &Notification) -> Result<(), OrderError> {
        if !self.outbox.enqueue(n).await? {
            tracing::debug!(key = %n.idempotency_key(), "notification already enqueued");
        }
        Ok(())
    }

    /// Re-read after a rejected guarded update. Attested wins over every
    /// other explanation; a vanished row is `ORDER_NOT_FOUND`.
    async fn explain(&self, id: i64, fallback: OrderError) -> OrderError {
        match self.store.get(id).await {
            Ok(Some(o)) if o.is_attested() => already_attested(&o),
            Ok(Some(_)) => fallback,
            Ok(None) => OrderError::OrderNotFound,
            Err(e) => OrderError::Store(e),
        }
    }
}

fn is_bound(order: &AttestationOrder) -> bool {
    order.status == OrderStatus::Addressed && order.wallet_address.is_some()
}

fn claim_ttl(secs: u64) -> chrono::Duration {
    let secs = secs.clamp(1, MAX_CLAIM_TTL_SECS) as i64;
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::zero())
}

fn already_attested(order: &AttestationOrder) -> OrderError {
    OrderError::AlreadyAttested {
        id: order.id,
        unit: order.unit.clone(),
    }
}
