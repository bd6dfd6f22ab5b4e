//! attest-testkit
//!
//! In-memory wiring of the full attestation stack for scenario tests:
//! order store, outbox, session cache, paper issuer, verification protocol
//! and inbound router, plus a deterministic signer and a switchable sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use serde_json::Value;

use attest_config::DeploymentSettings;
use attest_issuer_paper::PaperIssuer;
use attest_orders::{
    Lifecycle, MemoryOrderStore, MemoryOutbox, NewOrder, NotificationSink, OutboxEntry,
};
use attest_protocol::{
    format_signed_block, ownership_phrase, sign_envelope, Ed25519Verifier, InboundRouter,
    VerificationProtocol,
};
use attest_schemas::{Address, AttributeSet, DeviceAddress, Notification};
use attest_session::SessionStore;

/// Deterministic ed25519 identity derived from a one-byte seed.
pub struct TestSigner {
    key: SigningKey,
}

impl TestSigner {
    pub fn from_seed(seed: u8) -> Self {
        Self {
            key: SigningKey::from_bytes(&[seed; 32]),
        }
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.key.verifying_key().to_bytes())
    }

    /// Chat text carrying a signed-message block over `message`.
    pub fn proof(&self, message: Value) -> String {
        format!(
            "signed: {}",
            format_signed_block(&sign_envelope(&self.key, message))
        )
    }

    /// Proof that this signer owns its own address, asserting `data`.
    pub fn ownership_proof(&self, data: Value, provider: Option<&str>) -> String {
        let mut body = serde_json::Map::new();
        body.insert("message".into(), Value::String(ownership_phrase(&self.address())));
        body.insert("data".into(), data);
        if let Some(p) = provider {
            body.insert("provider".into(), Value::String(p.to_string()));
        }
        self.proof(Value::Object(body))
    }
}

/// Records every delivered entry; can be switched to fail.
#[derive(Default)]
pub struct RecordingSink {
    fail: AtomicBool,
    seen: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<Notification> {
        self.seen.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("recording sink switched to failing"));
        }
        self.seen
            .lock()
            .map_err(|_| anyhow!("recording sink lock poisoned"))?
            .push(entry.notification.clone());
        Ok(())
    }
}

/// Fully wired in-memory stack.
pub struct Harness {
    pub store: Arc<MemoryOrderStore>,
    pub outbox: Arc<MemoryOutbox>,
    pub issuer: Arc<PaperIssuer>,
    pub sessions: Arc<SessionStore>,
    pub protocol: Arc<VerificationProtocol>,
    pub inbound: InboundRouter,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_session_ttl_secs(86_400)
    }

    pub fn with_session_ttl_secs(ttl_secs: u64) -> Self {
        let store = Arc::new(MemoryOrderStore::new());
        let outbox = Arc::new(MemoryOutbox::new());
        let issuer = Arc::new(PaperIssuer::new());
        let sessions = Arc::new(SessionStore::with_ttl_secs(ttl_secs));

        let lifecycle = Lifecycle::new(store.clone(), outbox.clone());
        let protocol = Arc::new(
            VerificationProtocol::new(lifecycle, Arc::new(Ed25519Verifier), issuer.clone())
                .with_deployment(DeploymentSettings::default()),
        );
        let inbound = InboundRouter::new(protocol.clone(), sessions.clone());

        Self {
            store,
            outbox,
            issuer,
            sessions,
            protocol,
            inbound,
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        self.protocol.lifecycle()
    }

    /// Pending order under `provider` bound to `device`.
    pub async fn seed_order(
        &self,
        provider: Option<&str>,
        data: &AttributeSet,
        device: Option<&DeviceAddress>,
    ) -> Result<i64> {
        let mut new = NewOrder::new(provider.map(str::to_string), data.clone());
        new.device = device.cloned();
        Ok(self.lifecycle().create_order(new, false).await?.id)
    }
}

/// `{username: alice, userId: 42}`.
pub fn alice() -> Result<AttributeSet> {
    Ok(AttributeSet::from_pairs(
        [("username", "alice"), ("userId", "42")],
        attest_schemas::DEFAULT_MAX_ATTRIBUTES,
    )?)
}
