//! Verification protocol against in-memory stores. Every rejection path
//! asserts that the order store saw zero writes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use serde_json::json;

use attest_orders::{Lifecycle, MemoryOrderStore, MemoryOutbox, NewOrder, OrderFilter};
use attest_protocol::{
    format_signed_block, ownership_phrase, sign_envelope, Ed25519Verifier, InboundRouter,
    IssuanceService, ProtocolError, Reply, VerificationProtocol,
};
use attest_schemas::{Address, AttributeSet, DeviceAddress, OrderStatus, UnitId};
use attest_session::SessionStore;

#[derive(Default)]
struct StubIssuer {
    fail: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl IssuanceService for StubIssuer {
    async fn issue(
        &self,
        _provider: Option<&str>,
        address: &Address,
        _data: &AttributeSet,
    ) -> anyhow::Result<UnitId> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("issuer unavailable");
        }
        Ok(UnitId::new(format!("unit-{address}-{n}")))
    }
}

struct Harness {
    store: Arc<MemoryOrderStore>,
    issuer: Arc<StubIssuer>,
    protocol: Arc<VerificationProtocol>,
    key: SigningKey,
    device: DeviceAddress,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryOrderStore::new());
        let outbox = Arc::new(MemoryOutbox::new());
        let issuer = Arc::new(StubIssuer::default());
        let lifecycle = Lifecycle::new(store.clone(), outbox);
        let protocol = Arc::new(VerificationProtocol::new(
            lifecycle,
            Arc::new(Ed25519Verifier),
            issuer.clone(),
        ));
        Self {
            store,
            issuer,
            protocol,
            key: SigningKey::from_bytes(&[11u8; 32]),
            device: DeviceAddress::parse("dev-1").unwrap(),
        }
    }

    fn address(&self) -> Address {
        Address::from_public_key(&self.key.verifying_key().to_bytes())
    }

    async fn seed_order(&self) -> i64 {
        let mut new = NewOrder::new(Some("default".into()), alice());
        new.device = Some(self.device.clone());
        self.protocol
            .lifecycle()
            .create_order(new, false)
            .await
            .unwrap()
            .id
    }

    fn signed(&self, message: serde_json::Value) -> String {
        format!("proof: {}", format_signed_block(&sign_envelope(&self.key, message)))
    }
}

fn alice() -> AttributeSet {
    AttributeSet::from_pairs([("username", "alice"), ("userId", "42")], 4).unwrap()
}

#[tokio::test]
async fn valid_proof_attests_and_replies_with_unit() {
    let h = Harness::new();
    let id = h.seed_order().await;

    let text = h.signed(json!({
        "message": ownership_phrase(&h.address()),
        "data": {"username": "alice", "userId": 42},
        "provider": "default",
    }));
    let reply = h.protocol.respond(Some(&h.device), &text).await;

    let order = h.protocol.lifecycle().get_order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Attested);
    assert_eq!(order.wallet_address, Some(h.address()));
    let unit = order.unit.clone().unwrap();
    assert_eq!(reply, Reply::Success { unit: unit.clone() });
    assert!(reply.text().contains(unit.as_str()));
}

#[tokio::test]
async fn resubmission_after_attestation_writes_nothing() {
    let h = Harness::new();
    h.seed_order().await;
    let text = h.signed(json!({"data": {"username": "alice", "userId": "42"}}));

    assert!(matches!(
        h.protocol.respond(Some(&h.device), &text).await,
        Reply::Success { .. }
    ));
    let writes = h.store.mutation_count();

    let reply = h.protocol.respond(Some(&h.device), &text).await;
    assert!(matches!(reply, Reply::AlreadyAttested { unit: Some(_) }));
    assert_eq!(h.store.mutation_count(), writes);
    assert_eq!(h.issuer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tampered_signature_is_validation_failed() {
    let h = Harness::new();
    h.seed_order().await;
    let writes = h.store.mutation_count();

    let mut env = sign_envelope(&h.key, json!({"data": {"username": "alice", "userId": "42"}}));
    env.signed_message = json!({"data": {"username": "mallory", "userId": "42"}});
    let text = format_signed_block(&env);

    let err = h.protocol.process(Some(&h.device), &text).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ValidationFailed(_)), "got {err:?}");
    assert_eq!(h.store.mutation_count(), writes);
    assert_eq!(h.issuer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn claimed_address_of_someone_else_is_mismatch_address() {
    let h = Harness::new();
    h.seed_order().await;
    let writes = h.store.mutation_count();

    let other = Address::from_public_key(&[99u8; 32]);
    let text = h.signed(json!(ownership_phrase(&other)));

    let err = h.protocol.process(Some(&h.device), &text).await.unwrap_err();
    assert!(matches!(err, ProtocolError::MismatchAddress { .. }), "got {err:?}");
    assert_eq!(err.to_reply(), Reply::MismatchAddress);
    assert_eq!(h.store.mutation_count(), writes);
}

#[tokio::test]
async fn different_data_is_mismatch_data() {
    let h = Harness::new();
    h.seed_order().await;
    let writes = h.store.mutation_count();

    let text = h.signed(json!({"data": {"username": "alice", "userId": "43"}}));
    let err = h.protocol.process(Some(&h.device), &text).await.unwrap_err();
    assert!(matches!(err, ProtocolError::MismatchData { .. }), "got {err:?}");
    assert_eq!(h.store.mutation_count(), writes);

    // A subset of the order's data is not a match either.
    let text = h.signed(json!({"data": {"username": "alice"}}));
    let err = h.protocol.process(Some(&h.device), &text).await.unwrap_err();
    assert!(matches!(err, ProtocolError::MismatchData { .. }), "got {err:?}");

    // Same data under another provider.
    let text = h.signed(json!({
        "data": {"username": "alice", "userId": "42"},
        "provider": "other"
    }));
    let err = h.protocol.process(Some(&h.device), &text).await.unwrap_err();
    assert!(matches!(err, ProtocolError::MismatchData { .. }), "got {err:?}");
    assert_eq!(h.store.mutation_count(), writes);
}

#[tokio::test]
async fn unknown_endpoint_without_data_cannot_find_order() {
    let h = Harness::new();
    h.seed_order().await;
    let stranger = DeviceAddress::parse("dev-unknown").unwrap();
    let text = h.signed(json!(ownership_phrase(&h.address())));
    let err = h.protocol.process(Some(&stranger), &text).await.unwrap_err();
    assert!(matches!(err, ProtocolError::CannotFindOrder));
    assert_eq!(err.to_reply(), Reply::OrderNotFound);
}

#[tokio::test]
async fn missing_or_malformed_block_is_invalid_format() {
    let h = Harness::new();
    for text in ["hello", "(signed-message:%%%)", "(signed-message:aGVsbG8=)"] {
        let reply = h.protocol.respond(Some(&h.device), text).await;
        assert_eq!(reply, Reply::InvalidFormat, "{text}");
    }
    let text = h.signed(json!("I like turtles"));
    assert_eq!(h.protocol.respond(Some(&h.device), &text).await, Reply::InvalidFormat);
}

#[tokio::test]
async fn issuer_failure_leaves_order_untouched_and_retry_succeeds() {
    let h = Harness::new();
    let id = h.seed_order().await;
    h.issuer.fail.store(true, Ordering::SeqCst);

    let text = h.signed(json!({"data": {"username": "alice", "userId": "42"}}));
    assert_eq!(h.protocol.respond(Some(&h.device), &text).await, Reply::GenericError);

    let order = h.protocol.lifecycle().get_order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.unit.is_none());

    h.issuer.fail.store(false, Ordering::SeqCst);
    assert!(matches!(
        h.protocol.respond(Some(&h.device), &text).await,
        Reply::Success { .. }
    ));
}

#[tokio::test]
async fn inbound_router_binds_bare_address_then_verifies() {
    let h = Harness::new();
    let id = h.seed_order().await;
    let sessions = Arc::new(SessionStore::with_ttl_secs(3600));
    let router = InboundRouter::new(h.protocol.clone(), sessions.clone());

    assert_eq!(router.handle(&h.device, "hi").await, Reply::Help);

    let reply = router.handle(&h.device, &format!("  {}  ", h.address())).await;
    assert_eq!(reply, Reply::AddressAccepted { address: h.address() });
    let order = h.protocol.lifecycle().get_order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Addressed);
    let session = sessions.get(&h.device, chrono::Utc::now()).unwrap().unwrap();
    assert_eq!(session.address, Some(h.address()));

    let text = h.signed(json!(ownership_phrase(&h.address())));
    assert!(matches!(router.handle(&h.device, &text).await, Reply::Success { .. }));

    let open = OrderFilter::by_device(h.device.clone()).non_attested();
    assert!(h.protocol.lifecycle().find_order(&open).await.unwrap().is_none());
}
