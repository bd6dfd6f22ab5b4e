use attest_schemas::{AttributeError, OrderStatus, UnitId};

/// Lifecycle failures. Each variant carries enough context for the caller to
/// report the precise reason without another read.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("INVALID_DATA: {0}")]
    InvalidData(#[from] AttributeError),

    #[error("ALREADY_EXISTS: order {id} ({status}) matches this data")]
    AlreadyExists {
        id: i64,
        status: OrderStatus,
        unit: Option<UnitId>,
    },

    #[error("ALREADY_ATTESTED: order {id} already attested")]
    AlreadyAttested { id: i64, unit: Option<UnitId> },

    #[error("ADDRESS_NOT_FOUND: no order with a bindable address matches")]
    AddressNotFound,

    #[error("ORDER_NOT_FOUND: no matching order")]
    OrderNotFound,

    #[error("MISMATCH_ADDRESS: order {id} is bound to a different address")]
    MismatchAddress { id: i64 },

    #[error("ISSUANCE_IN_PROGRESS: order {id} is being issued by another flow")]
    IssuanceInProgress { id: i64 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl OrderError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::InvalidData(_) => "INVALID_DATA",
            OrderError::AlreadyExists { .. } => "ALREADY_EXISTS",
            OrderError::AlreadyAttested { .. } => "ALREADY_ATTESTED",
            OrderError::AddressNotFound => "ADDRESS_NOT_FOUND",
            OrderError::OrderNotFound => "ORDER_NOT_FOUND",
            OrderError::MismatchAddress { .. } => "MISMATCH_ADDRESS",
            OrderError::IssuanceInProgress { .. } => "ISSUANCE_IN_PROGRESS",
            OrderError::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether the same request may succeed if retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::IssuanceInProgress { .. } | OrderError::Store(_)
        )
    }
}
