//! The verification state machine.
//!
//! Steps run in order and the first failure ends the flow:
//!
//! 1. extract the signed-message block
//! 2. decode the envelope
//! 3. verify every author's signature
//! 4. parse the claim
//! 5. claimed address must equal the first signer's address
//! 6. resolve the order (by provider+data, else the endpoint's latest order)
//! 7. signed data and provider must equal the order's
//! 8. claim issuance, issue, finalize
//!
//! Steps 1 to 7 only read. Step 8 is the single writer and is guarded by the
//! issuance claim and the finalize conditional update.

use std::sync::Arc;

use attest_config::DeploymentSettings;
use attest_orders::{Lifecycle, OrderError, OrderFilter, OrderSelector};
use attest_schemas::{Address, AttestationOrder, DeviceAddress, UnitId, DEFAULT_MAX_ATTRIBUTES};

use crate::claim::{parse_claim, Claim};
use crate::envelope::{decode_envelope, extract_signed_block};
use crate::error::ProtocolError;
use crate::issuance::IssuanceService;
use crate::reply::Reply;
use crate::verifier::SignatureVerifier;

/// A completed attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolOutcome {
    pub order_id: i64,
    pub unit: UnitId,
}

pub struct VerificationProtocol {
    lifecycle: Lifecycle,
    verifier: Arc<dyn SignatureVerifier>,
    issuer: Arc<dyn IssuanceService>,
    deployment: DeploymentSettings,
    max_attributes: usize,
}

impl VerificationProtocol {
    pub fn new(
        lifecycle: Lifecycle,
        verifier: Arc<dyn SignatureVerifier>,
        issuer: Arc<dyn IssuanceService>,
    ) -> Self {
        Self {
            lifecycle,
            verifier,
            issuer,
            deployment: DeploymentSettings::default(),
            max_attributes: DEFAULT_MAX_ATTRIBUTES,
        }
    }

    pub fn with_deployment(mut self, deployment: DeploymentSettings) -> Self {
        self.deployment = deployment;
        self
    }

    pub fn with_max_attributes(mut self, max: usize) -> Self {
        self.max_attributes = max;
        self
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Run the protocol and translate the result into a user reply.
    pub async fn respond(&self, device: Option<&DeviceAddress>, text: &str) -> Reply {
        match self.process(device, text).await {
            Ok(ProtocolOutcome { unit, .. }) => Reply::Success { unit },
            Err(e) => {
                match &e {
                    ProtocolError::IssuanceFailure(_)
                    | ProtocolError::Order(OrderError::Store(_)) => {
                        tracing::error!(code = e.code(), error = %e, "verification failed")
                    }
                    _ => tracing::info!(code = e.code(), error = %e, "verification rejected"),
                }
                e.to_reply()
            }
        }
    }

    pub async fn process(
        &self,
        device: Option<&DeviceAddress>,
        text: &str,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        // 1. extract
        let payload = extract_signed_block(text)
            .ok_or_else(|| ProtocolError::InvalidFormat("no signed-message block".into()))?;

        // 2. decode
        let envelope = decode_envelope(&payload)?;

        // 3. authenticate
        self.verifier.verify(&envelope)?;
        let signer = envelope
            .authors
            .first()
            .ok_or_else(|| ProtocolError::ValidationFailed("no authors".into()))
            .and_then(|a| {
                Address::parse(&a.address)
                    .map_err(|e| ProtocolError::ValidationFailed(format!("signer address: {e}")))
            })?;

        // 4. claim
        let claim = parse_claim(&envelope.signed_message, &signer, self.max_attributes)?;

        // 5. address match
        if claim.address != signer {
            return Err(ProtocolError::MismatchAddress {
                claimed: claim.address,
                signer,
            });
        }

        // 6. lookup
        let provider = self.deployment.effective_provider(claim.provider.as_deref());
        let order = self.lookup(&claim, provider.as_deref(), device).await?;
        if order.is_attested() {
            tracing::info!(order_id = order.id, "signed message for attested order");
            return Err(ProtocolError::AlreadyAttested {
                order_id: order.id,
                unit: order.unit,
            });
        }

        // 7. data match
        if let Some(data) = &claim.data {
            if &order.data != data || order.provider.as_deref() != provider.as_deref() {
                return Err(ProtocolError::MismatchData { order_id: order.id });
            }
        }

        // 8. issue + finalize
        self.issue_and_finalize(&order, &claim.address).await
    }

    async fn lookup(
        &self,
        claim: &Claim,
        provider: Option<&str>,
        device: Option<&DeviceAddress>,
    ) -> Result<AttestationOrder, ProtocolError> {
        if let Some(data) = &claim.data {
            let filter = OrderFilter::by_data(provider, data.clone());
            if let Some(order) = self.lifecycle.find_order(&filter).await? {
                return Ok(order);
            }
        }
        if let Some(device) = device {
            let filter = OrderFilter::by_device(device.clone());
            if let Some(order) = self.lifecycle.find_order(&filter).await? {
                return Ok(order);
            }
        }
        Err(ProtocolError::CannotFindOrder)
    }

    async fn issue_and_finalize(
        &self,
        order: &AttestationOrder,
        address: &Address,
    ) -> Result<ProtocolOutcome, ProtocolError> {
        let claim = match self.lifecycle.claim_issuance(order.id, address).await {
            Ok(c) => c,
            Err(OrderError::AlreadyAttested { id, unit }) => {
                return Err(ProtocolError::AlreadyAttested { order_id: id, unit })
            }
            Err(e) => return Err(e.into()),
        };

        let unit = match self
            .issuer
            .issue(order.provider.as_deref(), address, &order.data)
            .await
        {
            Ok(unit) => unit,
            Err(e) => {
                tracing::error!(
                    order_id = order.id,
                    address = %address,
                    error = %e,
                    "issuance failed"
                );
                self.release(&claim).await;
                return Err(ProtocolError::IssuanceFailure(format!("{e:#}")));
            }
        };

        match self
            .lifecycle
            .finalize(&OrderSelector::Id(order.id), address, &unit)
            .await
        {
            Ok(_) => Ok(ProtocolOutcome {
                order_id: order.id,
                unit,
            }),
            Err(OrderError::AlreadyAttested { id, unit: persisted }) => {
                tracing::warn!(
                    order_id = id,
                    issued = %unit,
                    "order attested by another flow after issuance"
                );
                Err(ProtocolError::AlreadyAttested {
                    order_id: id,
                    unit: persisted,
                })
            }
            Err(e) => {
                tracing::error!(
                    order_id = order.id,
                    unit = %unit,
                    error = %e,
                    "finalize failed after issuance"
                );
                self.release(&claim).await;
                Err(e.into())
            }
        }
    }

    async fn release(&self, claim: &attest_orders::IssuanceClaim) {
        if let Err(e) = self.lifecycle.release_issuance(claim).await {
            tracing::warn!(
                order_id = claim.order_id,
                error = %e,
                "failed to release issuance claim"
            );
        }
    }
}
