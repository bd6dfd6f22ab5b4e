//! Ledger wallet addresses and conversational endpoint identities.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a ledger address token.
pub const ADDRESS_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address must be 32 characters, got {0}")]
    BadLength(usize),
    #[error("address contains invalid character {0:?}")]
    BadCharacter(char),
    #[error("device address must not be empty")]
    EmptyDevice,
}

/// A syntactically valid ledger address: 32 characters of `[0-9A-Z]`.
///
/// Addresses are derived from an author's ed25519 public key as the uppercase
/// hex of the first 16 bytes of its SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Syntactic validation only; no checksum or ownership is implied.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let count = s.chars().count();
        if count != ADDRESS_LEN {
            return Err(AddressError::BadLength(count));
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_digit() || c.is_ascii_uppercase()))
        {
            return Err(AddressError::BadCharacter(bad));
        }
        Ok(Self(s.to_string()))
    }

    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// Derive the address owned by an ed25519 public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = Sha256::digest(public_key);
        Self(hex::encode_upper(&digest[..ADDRESS_LEN / 2]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// Conversational endpoint (device) identity used for message routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let t = s.trim();
        if t.is_empty() {
            return Err(AddressError::EmptyDevice);
        }
        Ok(Self(t.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceAddress> for String {
    fn from(value: DeviceAddress) -> Self {
        value.0
    }
}
