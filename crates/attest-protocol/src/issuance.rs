use anyhow::Result;
use async_trait::async_trait;

use attest_schemas::{Address, AttributeSet, UnitId};

/// External credential issuance. Calls may fail; the caller leaves the
/// order untouched and the user retries.
#[async_trait]
pub trait IssuanceService: Send + Sync {
    async fn issue(
        &self,
        provider: Option<&str>,
        address: &Address,
        data: &AttributeSet,
    ) -> Result<UnitId>;
}
