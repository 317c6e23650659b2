//! Mishteh Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains money, funding requests, donations, ledger lines and
//! notification records.

#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    DeliveryState, Donation, DonationId, LedgerReceipt, Notification, NotificationId,
    NotificationKind, PaymentStatus, Request, RequestId, RequestStatus, Transaction,
    TransactionId, TransactionType, UserId, ANONYMOUS_DONOR,
};
pub use value_objects::{Currency, DomainError, ExternalPaymentId, Money};
