//! Ledger port definitions.
//!
//! Ports define the interfaces for external services (payment gateway,
//! notification delivery). Adapters implement these ports for specific
//! services (PayPal, stub, log, etc.).

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use mishteh_domain::{Currency, Notification};

use crate::error::LedgerError;

// =============================================================================
// Payment Capture Port
// =============================================================================

/// Port for capturing an approved payment order at the gateway.
///
/// The capture result is the ground truth for amount and currency; the
/// client-side order never is.
///
/// Implementations:
/// - `StubPaymentCapture` - For testing (configured orders, immediate capture)
#[async_trait]
pub trait PaymentCapturePort: Send + Sync {
    /// Capture an order.
    ///
    /// # Arguments
    ///
    /// * `order_id` - Gateway order id approved by the donor
    ///
    /// # Returns
    ///
    /// `CaptureResult` with status, captured gross amount and payer.
    async fn capture(&self, order_id: &str) -> Result<CaptureResult, LedgerError>;

    /// Gateway name recorded on ledger lines (e.g., "PAYPAL")
    fn gateway(&self) -> &str;
}

/// Status reported by the gateway for a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureStatus {
    /// Funds captured
    Completed,
    /// Capture accepted but not settled
    Pending,
    /// Donor's funding source declined
    Declined,
    /// Order was voided or expired
    Voided,
}

impl CaptureStatus {
    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Completed => "COMPLETED",
            CaptureStatus::Pending => "PENDING",
            CaptureStatus::Declined => "DECLINED",
            CaptureStatus::Voided => "VOIDED",
        }
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payer as reported by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerIdentity {
    /// Gateway payer id
    pub payer_id: Option<String>,
    pub email: Option<String>,
    /// "Given Surname"
    pub name: Option<String>,
}

/// Result of a capture call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub status: CaptureStatus,
    /// Identifier of the captured payment (the idempotency key)
    pub external_payment_id: String,
    /// Captured gross amount, as reported by the gateway
    pub gross_amount: Decimal,
    pub currency: Currency,
    pub payer: PayerIdentity,
}

impl CaptureResult {
    /// Check if the funds were captured
    pub fn is_completed(&self) -> bool {
        self.status == CaptureStatus::Completed
    }
}

// =============================================================================
// Notification Sink
// =============================================================================

/// Port for delivering notifications to users.
///
/// Delivery may be attempted more than once for the same notification (the
/// outbox worker retries pending entries), so implementations must treat a
/// repeated `notification.id` as already delivered.
///
/// Implementations:
/// - `MemoryNotificationSink` - For testing (records deliveries)
/// - `LogNotificationSink` - Development (writes a tracing event)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    async fn deliver(&self, notification: &Notification) -> Result<(), LedgerError>;
}

// =============================================================================
// Tests
// =============================================================================
