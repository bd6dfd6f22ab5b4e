//! Command handler modules for attest-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod keys;
pub mod order;

use std::sync::Arc;

use anyhow::{Context, Result};
use attest_config::Settings;
use attest_orders::Lifecycle;
use attest_schemas::{AttestationOrder, AttributeSet};

/// Settings from the layers named by `ATTEST_CONFIG` (defaults when unset).
pub fn load_settings() -> Result<Settings> {
    let loaded = attest_config::load_from_env().context("config load failed")?;
    tracing::debug!(config_hash = %loaded.config_hash, "config loaded");
    Ok(loaded.settings)
}

/// Postgres-backed lifecycle controller.
pub async fn lifecycle_from_env(settings: &Settings) -> Result<Lifecycle> {
    let pool = attest_db::connect_from_env().await?;
    Ok(Lifecycle::new(
        Arc::new(attest_db::PgOrderStore::new(pool.clone())),
        Arc::new(attest_db::PgOutbox::new(pool)),
    )
    .with_claim_ttl_secs(settings.orders.issuance_claim_ttl_secs))
}

/// `key=value` arguments into an attribute set under the configured cap.
pub fn parse_data(args: &[String], settings: &Settings) -> Result<AttributeSet> {
    AttributeSet::parse_kv_args(args, settings.orders.max_attributes)
        .context("invalid --data pairs")
}

pub fn print_order(o: &AttestationOrder) {
    println!("order_id={}", o.id);
    println!("provider={}", o.provider.as_deref().unwrap_or(""));
    println!("status={}", o.status.as_str());
    println!("data={}", o.data.canonical_json());
    println!(
        "wallet_address={}",
        o.wallet_address.as_ref().map(|a| a.as_str()).unwrap_or("")
    );
    println!(
        "device_address={}",
        o.device_address.as_ref().map(|d| d.as_str()).unwrap_or("")
    );
    println!("unit={}", o.unit.as_ref().map(|u| u.as_str()).unwrap_or(""));
    println!("created_at_utc={}", o.created_at.to_rfc3339());
    println!(
        "attested_at_utc={}",
        o.attested_at.map(|d| d.to_rfc3339()).unwrap_or_default()
    );
}
