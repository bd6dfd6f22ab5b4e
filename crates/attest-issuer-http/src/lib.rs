//! HTTP-backed issuance service.
//!
//! `POST {base_url}/v1/issue` with `{provider, address, data}` and a bearer
//! key; the issuer answers `{"unit": "..."}`. The API key is resolved by the
//! caller and passed in; do not log it.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use attest_config::{IssuanceSettings, ResolvedSecrets};
use attest_protocol::IssuanceService;
use attest_schemas::{Address, AttributeSet, UnitId};

#[derive(Clone)]
pub struct HttpIssuer {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for HttpIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIssuer")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpIssuer {
    pub fn new_with_base_url(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("issuer http client build failed")?;
        Ok(Self {
            api_key,
            http,
            base_url,
        })
    }

    /// Build from config plus resolved secrets.
    pub fn from_settings(settings: &IssuanceSettings, secrets: &ResolvedSecrets) -> Result<Self> {
        let api_key = secrets.issuer_api_key.clone().ok_or_else(|| {
            anyhow!(
                "SECRETS_MISSING issuer=http: env var '{}' not resolved",
                settings.api_key_env
            )
        })?;
        Self::new_with_base_url(
            api_key,
            settings.base_url.clone(),
            Duration::from_millis(settings.timeout_ms),
        )
    }

    fn build_issue_url(&self) -> String {
        format!("{}/v1/issue", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct IssueRequest<'a> {
    provider: Option<&'a str>,
    address: &'a str,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    unit: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl IssuanceService for HttpIssuer {
    async fn issue(
        &self,
        provider: Option<&str>,
        address: &Address,
        data: &AttributeSet,
    ) -> Result<UnitId> {
        let body = IssueRequest {
            provider,
            address: address.as_str(),
            data: data.to_json(),
        };

        let resp = self
            .http
            .post(self.build_issue_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("issuer request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "issuer http error status={} body={}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            ));
        }

        let parsed: IssueResponse = resp
            .json()
            .await
            .context("issuer response json decode failed")?;

        match parsed.unit.filter(|u| !u.trim().is_empty()) {
            Some(unit) => {
                tracing::debug!(address = %address, unit = %unit, "issuer returned unit");
                Ok(UnitId::new(unit))
            }
            None => Err(anyhow!(
                "issuer response missing unit: {}",
                parsed.message.as_deref().unwrap_or("unknown")
            )),
        }
    }
}
