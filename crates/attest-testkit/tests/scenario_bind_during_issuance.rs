//! An address change racing an in-flight issuance must lose: the lease
//! holder finalizes with the address it verified.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use attest_config::DeploymentSettings;
use attest_issuer_paper::PaperIssuer;
use attest_orders::{
    Lifecycle, MemoryOrderStore, MemoryOutbox, NewOrder, OrderError, OrderSelector,
};
use attest_protocol::{Ed25519Verifier, IssuanceService, Reply, VerificationProtocol};
use attest_schemas::{Address, AttributeSet, OrderStatus, UnitId};
use attest_testkit::{alice, TestSigner};

/// Issues through a paper issuer, but first tries to move the order to
/// another address and unbind it, recording what the lifecycle said.
struct RebindingIssuer {
    lifecycle: Lifecycle,
    order_id: i64,
    other: Address,
    inner: PaperIssuer,
    attempts: Mutex<Vec<String>>,
}

#[async_trait]
impl IssuanceService for RebindingIssuer {
    async fn issue(
        &self,
        provider: Option<&str>,
        address: &Address,
        data: &AttributeSet,
    ) -> Result<UnitId> {
        let selector = OrderSelector::Id(self.order_id);
        let bind = self.lifecycle.bind_address(&selector, &self.other).await;
        let unbind = self.lifecycle.unbind_address(&selector).await;
        {
            let mut seen = self.attempts.lock().unwrap();
            for r in [bind.map(|_| ()), unbind.map(|_| ())] {
                seen.push(match r {
                    Ok(()) => "ok".to_string(),
                    Err(e) => e.code().to_string(),
                });
            }
        }
        self.inner.issue(provider, address, data).await
    }
}

#[tokio::test]
async fn address_cannot_move_while_issuance_is_in_flight() {
    let store = Arc::new(MemoryOrderStore::new());
    let outbox = Arc::new(MemoryOutbox::new());
    let lifecycle = Lifecycle::new(store.clone(), outbox.clone());

    let signer = TestSigner::from_seed(21);
    let mut new = NewOrder::new(Some("default".into()), alice().unwrap());
    new.address = Some(signer.address());
    let id = lifecycle.create_order(new, false).await.unwrap().id;

    let issuer = Arc::new(RebindingIssuer {
        lifecycle: lifecycle.clone(),
        order_id: id,
        other: TestSigner::from_seed(22).address(),
        inner: PaperIssuer::new(),
        attempts: Mutex::new(Vec::new()),
    });
    let protocol =
        VerificationProtocol::new(lifecycle.clone(), Arc::new(Ed25519Verifier), issuer.clone())
            .with_deployment(DeploymentSettings::default());

    let text = signer.ownership_proof(json!({"username": "alice", "userId": "42"}), None);
    let reply = protocol.respond(None, &text).await;

    assert_eq!(
        *issuer.attempts.lock().unwrap(),
        vec!["ISSUANCE_IN_PROGRESS".to_string(), "ISSUANCE_IN_PROGRESS".to_string()]
    );
    let order = lifecycle.get_order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Attested);
    assert_eq!(order.wallet_address, Some(signer.address()));
    assert_eq!(reply, Reply::Success { unit: order.unit.clone().unwrap() });
    assert_eq!(issuer.inner.issued(), 1);

    // After attestation the same moves report the terminal state instead.
    assert!(matches!(
        lifecycle.bind_address(&OrderSelector::Id(id), &issuer.other).await,
        Err(OrderError::AlreadyAttested { .. })
    ));
}
