//! Deterministic in-process issuer.
//!
//! Unit ids are stable strings derived from the request inputs:
//!     "paper:{sha256(provider \n address \n canonical data)}:{seq}"
//! where `seq` counts successful issues made by this instance. No randomness.
//! No network. A fail switch lets tests drive the retry path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use attest_protocol::IssuanceService;
use attest_schemas::{Address, AttributeSet, UnitId};

#[derive(Debug, Default)]
pub struct PaperIssuer {
    calls: AtomicU64,
    issued: AtomicU64,
    fail: AtomicBool,
}

impl PaperIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `issue` call, failed or not.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// While set, `issue` fails without issuing anything.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

/// Hex digest of the request identity; the unit id minus its sequence.
pub fn request_digest(provider: Option<&str>, address: &Address, data: &AttributeSet) -> String {
    let mut h = Sha256::new();
    h.update(provider.unwrap_or("").as_bytes());
    h.update(b"\n");
    h.update(address.as_str().as_bytes());
    h.update(b"\n");
    h.update(data.canonical_json().as_bytes());
    hex::encode(h.finalize())
}

#[async_trait]
impl IssuanceService for PaperIssuer {
    async fn issue(
        &self,
        provider: Option<&str>,
        address: &Address,
        data: &AttributeSet,
    ) -> Result<UnitId> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("paper issuer switched to failing");
        }

        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let unit = UnitId::new(format!(
            "paper:{}:{seq}",
            request_digest(provider, address, data)
        ));
        tracing::debug!(address = %address, unit = %unit, "paper unit issued");
        Ok(unit)
    }
}
