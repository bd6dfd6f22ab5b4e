//! Typed view of the merged configuration. Every section has defaults, so an
//! empty config is a valid (providers-scoped, paper-issuer) deployment.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Upper bound for the issuance lease.
pub const MAX_CLAIM_TTL_SECS: u64 = 86_400;
/// Upper bound for the session idle ttl.
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 86_400;
/// Upper bound for background tick intervals and the issuer timeout.
pub const MAX_INTERVAL_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub deployment: DeploymentSettings,
    pub orders: OrderSettings,
    pub sessions: SessionSettings,
    pub outbox: OutboxSettings,
    pub issuance: IssuanceSettings,
    pub audit: AuditSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.orders.max_attributes == 0 {
            bail!("CONFIG_INVALID orders.max_attributes must be >= 1");
        }
        check_range(
            "orders.issuance_claim_ttl_secs",
            self.orders.issuance_claim_ttl_secs,
            MAX_CLAIM_TTL_SECS,
        )?;
        check_range("sessions.ttl_secs", self.sessions.ttl_secs, MAX_SESSION_TTL_SECS)?;
        check_range(
            "sessions.sweep_interval_secs",
            self.sessions.sweep_interval_secs,
            MAX_INTERVAL_MS / 1000,
        )?;
        check_range(
            "outbox.dispatch_interval_ms",
            self.outbox.dispatch_interval_ms,
            MAX_INTERVAL_MS,
        )?;
        check_range("issuance.timeout_ms", self.issuance.timeout_ms, MAX_INTERVAL_MS)?;
        if self.outbox.batch_size == 0 {
            bail!("CONFIG_INVALID outbox.batch_size must be > 0");
        }
        if self.deployment.provider_mode == ProviderMode::Scoped
            && self.deployment.default_provider.trim().is_empty()
        {
            bail!(
                "CONFIG_INVALID deployment.default_provider is required when provider_mode=scoped"
            );
        }
        if self.issuance.kind == IssuerKind::Http && self.issuance.base_url.trim().is_empty() {
            bail!("CONFIG_INVALID issuance.base_url is required when issuance.kind=http");
        }
        Ok(())
    }
}

fn check_range(key: &str, value: u64, max: u64) -> Result<()> {
    if value == 0 || value > max {
        bail!("CONFIG_INVALID {key} must be in 1..={max}, got {value}");
    }
    Ok(())
}

/// Whether orders carry a provider namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    Scoped,
    Providerless,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeploymentSettings {
    pub provider_mode: ProviderMode,
    pub default_provider: String,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            provider_mode: ProviderMode::Scoped,
            default_provider: "default".to_string(),
        }
    }
}

impl DeploymentSettings {
    /// Effective provider for a declared (possibly absent) one.
    ///
    /// Scoped deployments fall back to the default provider; providerless
    /// deployments keep whatever was declared so a stray provider still fails
    /// the data match against an unscoped order.
    pub fn effective_provider(&self, declared: Option<&str>) -> Option<String> {
        let declared = declared.map(str::trim).filter(|p| !p.is_empty());
        match self.provider_mode {
            ProviderMode::Scoped => Some(
                declared
                    .unwrap_or(self.default_provider.as_str())
                    .to_string(),
            ),
            ProviderMode::Providerless => declared.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrderSettings {
    pub max_attributes: usize,
    pub issuance_claim_ttl_secs: u64,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            max_attributes: 4,
            issuance_claim_ttl_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutboxSettings {
    pub dispatch_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: 500,
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuerKind {
    Paper,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IssuanceSettings {
    pub kind: IssuerKind,
    pub base_url: String,
    /// Env var NAME holding the issuer API key. Never the key itself.
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for IssuanceSettings {
    fn default() -> Self {
        Self {
            kind: IssuerKind::Paper,
            base_url: String::new(),
            api_key_env: "ATTEST_ISSUER_API_KEY".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditSettings {
    /// JSONL audit path. `None` disables the audit sink.
    pub path: Option<String>,
    pub hash_chain: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            path: None,
            hash_chain: true,
        }
    }
}
