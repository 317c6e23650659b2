//! Ledger layer error types.

use mishteh_domain::{Currency, DomainError, RequestId, RequestStatus};
use mishteh_engine::EngineError;
use mishteh_store::StoreError;
use thiserror::Error;

/// Errors that can occur while recording or reading donations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No request with this id
    #[error("Request not found: {request_id}")]
    RequestNotFound {
        /// Request the donation targeted
        request_id: RequestId,
    },

    /// Request is WITHDRAWN or REJECTED
    #[error("Request {request_id} is not accepting funds (status {status})")]
    RequestNotAcceptingFunds {
        /// Request the donation targeted
        request_id: RequestId,
        /// Status the request was found in
        status: RequestStatus,
    },

    /// Non-positive amount, or fee that would consume the whole amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Donation currency differs from the request currency
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        /// Request currency
        expected: Currency,
        /// Donation currency
        actual: Currency,
    },

    /// Payment was already applied.
    ///
    /// `record_completed_donation` returns the stored result with
    /// `replayed = true` instead; this variant exists for callers that want
    /// to treat replays as errors.
    #[error("Payment already applied: {external_payment_id}")]
    DuplicatePayment {
        /// Gateway payment identifier
        external_payment_id: String,
    },

    /// Compare-and-swap kept losing against concurrent donations
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// Store could not be reached or failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    /// Capture did not complete at the payment gateway
    #[error("Payment {order_id} not completed (status {status})")]
    PaymentNotCompleted {
        /// Gateway order id
        order_id: String,
        /// Status reported by the gateway
        status: String,
    },

    /// Payment gateway could not be reached or rejected the call
    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    /// Notification sink refused or failed a delivery (never fails a donation)
    #[error("Notification delivery failed: {0}")]
    NotificationDelivery(String),

    /// Malformed command (empty payment id, blank donor name, ...)
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl LedgerError {
    /// Map an engine rejection, attaching the request it concerned.
    pub fn from_engine(err: EngineError, request_id: RequestId) -> Self {
        match err {
            EngineError::RequestNotAcceptingFunds { status } => {
                LedgerError::RequestNotAcceptingFunds { request_id, status }
            },
            EngineError::CurrencyMismatch { expected, actual } => {
                LedgerError::CurrencyMismatch { expected, actual }
            },
            EngineError::InvalidAmount(msg) => LedgerError::InvalidAmount(msg),
            EngineError::InvalidFeePolicy(msg) => LedgerError::InvalidCommand(msg),
        }
    }

    /// True for errors raised before anything was persisted
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::RequestNotFound { .. }
                | LedgerError::RequestNotAcceptingFunds { .. }
                | LedgerError::InvalidAmount(_)
                | LedgerError::CurrencyMismatch { .. }
                | LedgerError::InvalidCommand(_)
        )
    }
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::CurrencyMismatch { expected, actual } => {
                LedgerError::CurrencyMismatch { expected, actual }
            },
            DomainError::InvalidAmount(msg) => LedgerError::InvalidAmount(msg),
            other => LedgerError::InvalidCommand(other.to_string()),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => LedgerError::StorageConflict(err.to_string()),
            StoreError::Domain(domain) => domain.into(),
            other => LedgerError::StorageUnavailable(other),
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

// =============================================================================
// Tests
// =============================================================================
