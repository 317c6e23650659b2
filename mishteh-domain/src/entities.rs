//! Domain Entities for the Mishteh ledger
//!
//! Funding requests, donations, accounting-ledger lines and notifications.
//! All entities have identity; requests carry the funding lifecycle.

use crate::value_objects::{Currency, DomainError, ExternalPaymentId, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for a funding Request
pub type RequestId = Uuid;

/// Unique identifier for a platform user (donor or requester)
pub type UserId = Uuid;

/// Unique identifier for a Donation
pub type DonationId = Uuid;

/// Unique identifier for a ledger Transaction
pub type TransactionId = Uuid;

/// Unique identifier for a Notification
pub type NotificationId = Uuid;

// =============================================================================
// Request
// =============================================================================

/// A funding campaign posted by a requester.
///
/// Funding fields (`current_amount`, `status`, `version`) are only changed by
/// the ledger writer. `version` increments on every funding update and is
/// the compare-and-swap token that serializes concurrent donations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub owner_id: UserId,
    pub title: String,
    pub currency: Currency,
    pub target_amount: Option<Money>,
    pub current_amount: Money,
    pub status: RequestStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// Create a new request awaiting administrative review
    ///
    /// # Errors
    /// - `InvalidAmount` if the target is zero
    /// - `CurrencyMismatch` if the target is not in the request currency
    pub fn new(
        owner_id: UserId,
        title: impl Into<String>,
        currency: Currency,
        target_amount: Option<Money>,
    ) -> Result<Self, DomainError> {
        if let Some(target) = &target_amount {
            if target.currency() != currency {
                return Err(DomainError::CurrencyMismatch {
                    expected: currency,
                    actual: target.currency(),
                });
            }
            if !target.is_positive() {
                return Err(DomainError::InvalidAmount(
                    "Target amount must be positive".to_string(),
                ));
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(),
            owner_id,
            title: title.into(),
            currency,
            target_amount,
            current_amount: Money::zero(currency),
            status: RequestStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Administrative approval (PENDING → ACTIVE)
    pub fn approve(&mut self) -> Result<(), DomainError> {
        self.review(RequestStatus::Active)
    }

    /// Administrative rejection (PENDING → REJECTED)
    pub fn reject(&mut self) -> Result<(), DomainError> {
        self.review(RequestStatus::Rejected)
    }

    /// Requester withdraws the request; terminal.
    pub fn withdraw(&mut self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot withdraw a {} request",
                self.status
            )));
        }
        self.status = RequestStatus::Withdrawn;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn review(&mut self, outcome: RequestStatus) -> Result<(), DomainError> {
        if self.status != RequestStatus::Pending {
            return Err(DomainError::InvalidStateTransition(format!(
                "Only PENDING requests can be reviewed (status is {})",
                self.status
            )));
        }
        self.status = outcome;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Amount still needed to reach the target (zero once funded).
    ///
    /// `None` when the request has no target.
    pub fn remaining(&self) -> Option<Money> {
        self.target_amount
            .as_ref()
            .and_then(|target| target.saturating_sub(&self.current_amount).ok())
    }

    /// Check if the request currently accepts contributions
    pub fn accepts_funds(&self) -> bool {
        self.status.accepts_funds()
    }
}

/// Lifecycle of a funding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Awaiting administrative review
    Pending,
    /// Approved, no donations yet
    Active,
    /// Received donations, target not yet reached
    PartiallyFunded,
    /// Target reached (further donations still accepted)
    Funded,
    /// Withdrawn by the requester (terminal)
    Withdrawn,
    /// Rejected by an administrator (terminal)
    Rejected,
}

impl RequestStatus {
    /// Canonical upper-case name (as stored)
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Active => "ACTIVE",
            RequestStatus::PartiallyFunded => "PARTIALLY_FUNDED",
            RequestStatus::Funded => "FUNDED",
            RequestStatus::Withdrawn => "WITHDRAWN",
            RequestStatus::Rejected => "REJECTED",
        }
    }

    /// Terminal statuses never change `current_amount` again
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Withdrawn | RequestStatus::Rejected)
    }

    /// Every non-terminal status accepts contributions
    pub fn accepts_funds(&self) -> bool {
        !self.is_terminal()
    }
}

impl FromStr for RequestStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RequestStatus::Pending),
            "ACTIVE" => Ok(RequestStatus::Active),
            "PARTIALLY_FUNDED" => Ok(RequestStatus::PartiallyFunded),
            "FUNDED" => Ok(RequestStatus::Funded),
            "WITHDRAWN" => Ok(RequestStatus::Withdrawn),
            "REJECTED" => Ok(RequestStatus::Rejected),
            other => Err(DomainError::InvalidStateTransition(format!(
                "Unknown request status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Donation
// =============================================================================

/// A single contribution from a donor to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: DonationId,
    pub request_id: RequestId,
    pub donor_id: UserId,
    pub amount: Money,
    pub message: Option<String>,
    pub anonymous: bool,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub external_payment_id: ExternalPaymentId,
    pub created_at: DateTime<Utc>,
}

impl Donation {
    /// Create a donation for a captured payment
    pub fn completed(
        request_id: RequestId,
        donor_id: UserId,
        amount: Money,
        message: Option<String>,
        anonymous: bool,
        payment_method: impl Into<String>,
        external_payment_id: ExternalPaymentId,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            request_id,
            donor_id,
            amount,
            message: message.filter(|m| !m.trim().is_empty()),
            anonymous,
            payment_status: PaymentStatus::Completed,
            payment_method: payment_method.into(),
            external_payment_id,
            created_at: Utc::now(),
        }
    }
}

/// Payment status of a donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Pledged but not yet paid
    Pledged,
    /// Payment captured
    Completed,
    /// Payment returned to the donor
    Refunded,
}

impl PaymentStatus {
    /// Canonical upper-case name (as stored)
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pledged => "PLEDGED",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLEDGED" => Ok(PaymentStatus::Pledged),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(DomainError::InvalidStateTransition(format!(
                "Unknown payment status: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Display name recorded for anonymous donors
pub const ANONYMOUS_DONOR: &str = "Anonymous";

/// An immutable accounting-ledger line.
///
/// Each captured payment produces a DONATION line (gross, fee, net) and a
/// FEE line (fee, zero, fee) whose payment id carries the `-fee` suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub tx_type: TransactionType,
    pub amount: Money,
    pub fee_amount: Money,
    pub net_amount: Money,
    pub payment_gateway: String,
    pub payment_id: String,
    pub payer_id: Option<String>,
    pub donor_id: UserId,
    pub donor_name: String,
    pub recipient_id: UserId,
    pub donation_id: DonationId,
    pub request_id: RequestId,
    pub completed_at: DateTime<Utc>,
}

impl Transaction {
    /// Currency shared by all three amounts
    pub fn currency(&self) -> Currency {
        self.amount.currency()
    }
}

/// Kind of ledger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Gross contribution to a request
    Donation,
    /// Platform fee retained from a contribution
    Fee,
    /// Money returned to a donor
    Refund,
}

impl TransactionType {
    /// Canonical upper-case name (as stored)
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Donation => "DONATION",
            TransactionType::Fee => "FEE",
            TransactionType::Refund => "REFUND",
        }
    }
}

impl FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DONATION" => Ok(TransactionType::Donation),
            "FEE" => Ok(TransactionType::Fee),
            "REFUND" => Ok(TransactionType::Refund),
            other => Err(DomainError::InvalidStateTransition(format!(
                "Unknown transaction type: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Notification
// =============================================================================

/// A user-facing event record, written to the outbox with the donation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub read: bool,
    pub delivery: DeliveryState,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Build the "donation received" notification for the request owner.
    ///
    /// `donor_name` is `None` for anonymous donations; the donor is still
    /// recorded on the donation itself, only the wording differs.
    pub fn donation_received(request: &Request, amount: &Money, donor_name: Option<&str>) -> Self {
        let message = match donor_name {
            Some(name) => format!(
                "{} donated {} to your request \"{}\"",
                name, amount, request.title
            ),
            None => format!(
                "You received a donation of {} from an anonymous donor.",
                amount
            ),
        };

        Self {
            id: Uuid::now_v7(),
            user_id: request.owner_id,
            kind: NotificationKind::DonationReceived,
            title: "New Donation Received".to_string(),
            message,
            link: Some(format!("/dashboard/requests/{}", request.id)),
            read: false,
            delivery: DeliveryState::Pending,
            attempts: 0,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }

    /// Check if the notification still awaits delivery
    pub fn is_pending(&self) -> bool {
        matches!(self.delivery, DeliveryState::Pending)
    }
}

/// Notification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A donation was recorded against one of the user's requests
    DonationReceived,
}

impl NotificationKind {
    /// Canonical upper-case name (as stored)
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DonationReceived => "DONATION_RECEIVED",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DONATION_RECEIVED" => Ok(NotificationKind::DonationReceived),
            other => Err(DomainError::InvalidStateTransition(format!(
                "Unknown notification kind: {}",
                other
            ))),
        }
    }
}

/// Outbox delivery state of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    /// Committed with the donation, not yet handed to the sink
    Pending,
    /// Accepted by the notification sink
    Delivered,
}

// =============================================================================
// Ledger receipt
// =============================================================================

/// Identifiers of the records written for one applied payment.
///
/// Stored with the idempotency key so replays can return the original result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub donation_id: DonationId,
    pub donation_transaction_id: TransactionId,
    pub fee_transaction_id: TransactionId,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn zar(value: rust_decimal::Decimal) -> Money {
        Money::new(value, Currency::Zar).unwrap()
    }

    fn create_test_request(target: Option<Money>) -> Request {
        Request::new(Uuid::now_v7(), "School Fees for 3 Children", Currency::Zar, target).unwrap()
    }

    // Request tests
    #[test]
    fn test_new_request_is_pending_and_empty() {
        let request = create_test_request(Some(zar(dec!(8500))));

        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.current_amount.is_zero());
        assert_eq!(request.version, 0);
        assert!(request.accepts_funds());
    }

    #[test]
    fn test_request_target_must_match_currency() {
        let usd = Money::new(dec!(100), Currency::Usd).unwrap();
        let result = Request::new(Uuid::now_v7(), "Rent", Currency::Zar, Some(usd));
        assert!(matches!(result, Err(DomainError::CurrencyMismatch { .. })));
    }

    #[test]
    fn test_request_target_must_be_positive() {
        let result = Request::new(Uuid::now_v7(), "Rent", Currency::Zar, Some(Money::zero(Currency::Zar)));
        assert!(matches!(result, Err(DomainError::InvalidAmount(_))));
    }

    #[test]
    fn test_request_review_transitions() {
        let mut request = create_test_request(None);
        request.approve().unwrap();
        assert_eq!(request.status, RequestStatus::Active);

        // Already reviewed
        assert!(request.reject().is_err());

        let mut other = create_test_request(None);
        other.reject().unwrap();
        assert_eq!(other.status, RequestStatus::Rejected);
        assert!(!other.accepts_funds());
    }

    #[test]
    fn test_request_withdraw_is_terminal() {
        let mut request = create_test_request(None);
        request.approve().unwrap();
        request.withdraw().unwrap();

        assert_eq!(request.status, RequestStatus::Withdrawn);
        assert!(request.withdraw().is_err());
    }

    #[test]
    fn test_request_remaining() {
        let mut request = create_test_request(Some(zar(dec!(1000))));
        request.current_amount = zar(dec!(400));
        assert_eq!(request.remaining().unwrap().amount(), dec!(600));

        request.current_amount = zar(dec!(1050));
        assert!(request.remaining().unwrap().is_zero());

        let open_ended = create_test_request(None);
        assert!(open_ended.remaining().is_none());
    }

    #[test]
    fn test_request_status_round_trip_names() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Active,
            RequestStatus::PartiallyFunded,
            RequestStatus::Funded,
            RequestStatus::Withdrawn,
            RequestStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&RequestStatus::PartiallyFunded).unwrap(),
            "\"PARTIALLY_FUNDED\""
        );
    }

    // Donation tests
    #[test]
    fn test_completed_donation_drops_blank_message() {
        let donation = Donation::completed(
            Uuid::now_v7(),
            Uuid::now_v7(),
            zar(dec!(50)),
            Some("   ".to_string()),
            false,
            "PAYPAL",
            ExternalPaymentId::new("ORDER-1").unwrap(),
        );

        assert_eq!(donation.payment_status, PaymentStatus::Completed);
        assert!(donation.message.is_none());
    }

    // Notification tests
    #[test]
    fn test_notification_attributed_message() {
        let request = create_test_request(None);
        let notification =
            Notification::donation_received(&request, &zar(dec!(250)), Some("Thandi"));

        assert_eq!(notification.user_id, request.owner_id);
        assert_eq!(notification.title, "New Donation Received");
        assert_eq!(
            notification.message,
            "Thandi donated 250.00 ZAR to your request \"School Fees for 3 Children\""
        );
        assert_eq!(
            notification.link.as_deref(),
            Some(format!("/dashboard/requests/{}", request.id).as_str())
        );
        assert!(notification.is_pending());
    }

    #[test]
    fn test_notification_anonymous_message() {
        let request = create_test_request(None);
        let notification = Notification::donation_received(&request, &zar(dec!(10)), None);

        assert_eq!(
            notification.message,
            "You received a donation of 10.00 ZAR from an anonymous donor."
        );
        assert!(!notification.message.contains("Thandi"));
    }
}
