use attest_orders::OrderError;
use attest_schemas::{Address, AttributeError, UnitId};

use crate::reply::Reply;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("INVALID_FORMAT: {0}")]
    InvalidFormat(String),

    #[error("INVALID_DATA: {0}")]
    InvalidData(#[from] AttributeError),

    #[error("VALIDATION_FAILED: {0}")]
    ValidationFailed(String),

    #[error("MISMATCH_ADDRESS: claimed {claimed}, signed by {signer}")]
    MismatchAddress { claimed: Address, signer: Address },

    #[error("MISMATCH_DATA: signed data does not match order {order_id}")]
    MismatchData { order_id: i64 },

    #[error("CANNOT_FIND_ORDER")]
    CannotFindOrder,

    #[error("ALREADY_ATTESTED: order {order_id}")]
    AlreadyAttested { order_id: i64, unit: Option<UnitId> },

    #[error("ISSUANCE_FAILURE: {0}")]
    IssuanceFailure(String),

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidFormat(_) => "INVALID_FORMAT",
            ProtocolError::InvalidData(_) => "INVALID_DATA",
            ProtocolError::ValidationFailed(_) => "VALIDATION_FAILED",
            ProtocolError::MismatchAddress { .. } => "MISMATCH_ADDRESS",
            ProtocolError::MismatchData { .. } => "MISMATCH_DATA",
            ProtocolError::CannotFindOrder => "CANNOT_FIND_ORDER",
            ProtocolError::AlreadyAttested { .. } => "ALREADY_ATTESTED",
            ProtocolError::IssuanceFailure(_) => "ISSUANCE_FAILURE",
            ProtocolError::Order(e) => e.code(),
        }
    }

    /// User-facing reply for this failure.
    pub fn to_reply(&self) -> Reply {
        match self {
            ProtocolError::InvalidFormat(_) | ProtocolError::InvalidData(_) => Reply::InvalidFormat,
            ProtocolError::ValidationFailed(_) => Reply::ValidationFailed,
            ProtocolError::MismatchAddress { .. } => Reply::MismatchAddress,
            ProtocolError::MismatchData { .. } => Reply::MismatchData,
            ProtocolError::CannotFindOrder => Reply::OrderNotFound,
            ProtocolError::AlreadyAttested { unit, .. } => {
                Reply::AlreadyAttested { unit: unit.clone() }
            }
            ProtocolError::IssuanceFailure(_) => Reply::GenericError,
            ProtocolError::Order(e) => match e {
                OrderError::AlreadyAttested { unit, .. } => {
                    Reply::AlreadyAttested { unit: unit.clone() }
                }
                OrderError::MismatchAddress { .. } => Reply::MismatchAddress,
                OrderError::OrderNotFound | OrderError::AddressNotFound => Reply::OrderNotFound,
                OrderError::InvalidData(_) => Reply::InvalidFormat,
                OrderError::AlreadyExists { .. }
                | OrderError::IssuanceInProgress { .. }
                | OrderError::Store(_) => Reply::GenericError,
            },
        }
    }
}
