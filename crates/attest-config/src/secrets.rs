//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"ATTEST_ISSUER_API_KEY"`).
//! - At startup, callers invoke [`resolve_secrets`] once and pass the result
//!   into constructors; never scatter `std::env::var` calls across the code.
//! - `Debug` output **redacts** values.
//! - Error messages reference the env var **NAME**, never the value.

use anyhow::{bail, Result};

use crate::{IssuerKind, Settings};

/// All runtime-resolved secrets for one process.
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Bearer key for the HTTP issuer. `None` if the named env var was absent or empty.
    pub issuer_api_key: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "issuer_api_key",
                &self.issuer_api_key.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve secrets from the process environment.
pub fn resolve_secrets(settings: &Settings) -> Result<ResolvedSecrets> {
    resolve_secrets_with(settings, |name| std::env::var(name).ok())
}

/// Resolve secrets through an explicit lookup (tests inject a map).
///
/// # Enforcement
/// | Issuer | Required               |
/// |--------|------------------------|
/// | http   | issuer api key         |
/// | paper  | nothing                |
pub fn resolve_secrets_with<F>(settings: &Settings, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let var = settings.issuance.api_key_env.trim();
    let issuer_api_key = if var.is_empty() {
        None
    } else {
        lookup(var).filter(|v| !v.trim().is_empty())
    };

    if settings.issuance.kind == IssuerKind::Http && issuer_api_key.is_none() {
        bail!(
            "SECRETS_MISSING issuer=http: required env var '{var}' \
             (issuer api key) is not set or empty"
        );
    }

    Ok(ResolvedSecrets { issuer_api_key })
}
