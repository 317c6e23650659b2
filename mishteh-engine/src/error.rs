//! Engine error types.

use mishteh_domain::{Currency, DomainError, RequestStatus};
use thiserror::Error;

/// Errors produced by the pure funding and fee decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Non-positive contribution, or fee that would consume the whole amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Request is in a terminal status
    #[error("Request not accepting funds (status {status})")]
    RequestNotAcceptingFunds {
        /// Status the request was found in
        status: RequestStatus,
    },

    /// Contribution currency differs from the request currency
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        /// Request currency
        expected: Currency,
        /// Contribution currency
        actual: Currency,
    },

    /// Fee policy configuration is unusable
    #[error("Invalid fee policy: {0}")]
    InvalidFeePolicy(String),
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::CurrencyMismatch { expected, actual } => {
                EngineError::CurrencyMismatch { expected, actual }
            },
            other => EngineError::InvalidAmount(other.to_string()),
        }
    }
}

/// Result type for engine decisions.
pub type EngineResult<T> = Result<T, EngineError>;
