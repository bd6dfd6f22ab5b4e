use std::fmt;

use serde::{Deserialize, Serialize};

use attest_schemas::{Address, UnitId};

use crate::claim::ownership_phrase;

/// Outbound reply catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    InvalidFormat,
    ValidationFailed,
    MismatchAddress,
    MismatchData,
    AlreadyAttested { unit: Option<UnitId> },
    OrderNotFound,
    /// Transient failure; the user should retry.
    GenericError,
    Success { unit: UnitId },
    AddressAccepted { address: Address },
    Help,
}

impl Reply {
    pub fn code(&self) -> &'static str {
        match self {
            Reply::InvalidFormat => "invalid_format",
            Reply::ValidationFailed => "validation_failed",
            Reply::MismatchAddress => "mismatch_address",
            Reply::MismatchData => "mismatch_data",
            Reply::AlreadyAttested { .. } => "already_attested",
            Reply::OrderNotFound => "order_not_found",
            Reply::GenericError => "generic_error",
            Reply::Success { .. } => "success",
            Reply::AddressAccepted { .. } => "address_accepted",
            Reply::Help => "help",
        }
    }

    pub fn text(&self) -> String {
        match self {
            Reply::InvalidFormat => "Could not read your signed message. Sign the message exactly \
                as instructed and paste the whole (signed-message:...) block."
                .to_string(),
            Reply::ValidationFailed => {
                "Signature validation failed. Sign again with the wallet that owns the address."
                    .to_string()
            }
            Reply::MismatchAddress => {
                "The signing wallet does not own the address in the message.".to_string()
            }
            Reply::MismatchData => "The signed data does not match your order.".to_string(),
            Reply::AlreadyAttested { unit: Some(unit) } => {
                format!("This order is already attested. Unit: {unit}")
            }
            Reply::AlreadyAttested { unit: None } => "This order is already attested.".to_string(),
            Reply::OrderNotFound => {
                "No attestation order was found for this conversation.".to_string()
            }
            Reply::GenericError => {
                "Something went wrong on our side. Please try again in a moment.".to_string()
            }
            Reply::Success { unit } => format!("Attestation complete. Unit: {unit}"),
            Reply::AddressAccepted { address } => format!(
                "Address {address} received. Sign the message \"{}\" with that wallet and \
                 send the signed-message block here.",
                ownership_phrase(address)
            ),
            Reply::Help => "Send your wallet address to begin, or paste a (signed-message:...) \
                block to complete an attestation."
                .to_string(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
