//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the ledger.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mishteh_domain::{
    Donation, DonationId, ExternalPaymentId, LedgerReceipt, Notification, NotificationId, Request,
    RequestId, Transaction, TransactionId, UserId,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Repository for Request entities
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Save a request (insert or update).
    ///
    /// Used by the administrative path only; funding updates go through
    /// [`Store::commit_donation`].
    async fn save(&self, request: &Request) -> Result<(), StoreError>;

    /// Find a request by ID
    async fn find_by_id(&self, id: RequestId) -> Result<Option<Request>, StoreError>;

    /// Find all requests owned by a user
    async fn find_by_owner(&self, owner_id: UserId) -> Result<Vec<Request>, StoreError>;
}

/// Repository for Donation entities (written only by `commit_donation`)
#[async_trait]
pub trait DonationRepository: Send + Sync {
    /// Find a donation by ID
    async fn find_by_id(&self, id: DonationId) -> Result<Option<Donation>, StoreError>;

    /// Find all donations to a request, oldest first
    async fn find_by_request(&self, request_id: RequestId) -> Result<Vec<Donation>, StoreError>;

    /// Count donations to a request without loading them
    async fn count_by_request(&self, request_id: RequestId) -> Result<usize, StoreError>;

    /// Find all donations made by a donor, newest first
    async fn find_by_donor(&self, donor_id: UserId) -> Result<Vec<Donation>, StoreError>;

    /// Find the donation created for an external payment
    async fn find_by_payment_id(
        &self,
        payment_id: &ExternalPaymentId,
    ) -> Result<Option<Donation>, StoreError>;
}

/// Repository for ledger Transactions (append-only)
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Find a transaction by ID
    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// Find a transaction by its payment id (`ORDER` or `ORDER-fee`)
    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>, StoreError>;

    /// Find all ledger lines of a donation
    async fn find_by_donation(&self, donation_id: DonationId)
        -> Result<Vec<Transaction>, StoreError>;

    /// Find all ledger lines of a request, oldest first
    async fn find_by_request(&self, request_id: RequestId) -> Result<Vec<Transaction>, StoreError>;
}

/// Repository for Notifications (outbox)
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Find a notification by ID
    async fn find_by_id(&self, id: NotificationId) -> Result<Option<Notification>, StoreError>;

    /// Find all notifications for a user, newest first
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Notification>, StoreError>;

    /// Oldest pending notifications, up to `limit`
    async fn find_pending(&self, limit: usize) -> Result<Vec<Notification>, StoreError>;

    /// Mark a notification as delivered (idempotent)
    async fn mark_delivered(&self, id: NotificationId) -> Result<(), StoreError>;

    /// Count a failed delivery attempt
    async fn record_failed_attempt(&self, id: NotificationId) -> Result<(), StoreError>;
}

/// Result of an atomic idempotency claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now holds the claim.
    ///
    /// `taken_over` is set when a stale claim (older than the lease) was
    /// replaced.
    Acquired { taken_over: bool },
    /// Another caller holds a live claim and has not committed yet
    InFlight { claimed_at: DateTime<Utc> },
    /// The payment was already applied
    Applied(LedgerReceipt),
}

/// Stored state of one idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub claim_token: Uuid,
    pub claimed_at: DateTime<Utc>,
    pub receipt: Option<LedgerReceipt>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    /// True once the payment has been committed to the ledger
    pub fn is_applied(&self) -> bool {
        self.receipt.is_some()
    }

    /// True if the claim is older than `lease` and may be taken over
    pub fn lease_expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        (now - self.claimed_at)
            .to_std()
            .map(|elapsed| elapsed >= lease)
            .unwrap_or(false)
    }
}

/// Repository for idempotency keys
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Atomically claim `key` (insert-if-absent).
    ///
    /// Exactly one concurrent caller receives `Acquired`. A claim older than
    /// `lease` that was never applied is replaced by the caller's token.
    async fn try_claim(
        &self,
        key: &ExternalPaymentId,
        token: Uuid,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Release an unapplied claim held with `token`.
    ///
    /// Returns `false` if the claim is gone, applied, or held by another token.
    async fn release(&self, key: &ExternalPaymentId, token: Uuid) -> Result<bool, StoreError>;

    /// Look up the record for a key
    async fn find(&self, key: &ExternalPaymentId) -> Result<Option<IdempotencyRecord>, StoreError>;
}

/// Every record produced by one captured payment, committed as one unit.
#[derive(Debug, Clone)]
pub struct DonationCommit {
    /// Request with its new amount, status and `version = expected_version + 1`
    pub request: Request,
    /// Version the funding decision was based on
    pub expected_version: i64,
    pub donation: Donation,
    pub donation_transaction: Transaction,
    pub fee_transaction: Transaction,
    /// Outbox entry, absent when notifications are suppressed
    pub notification: Option<Notification>,
    pub idempotency_key: ExternalPaymentId,
}

impl DonationCommit {
    /// Receipt stored with the idempotency key
    pub fn receipt(&self) -> LedgerReceipt {
        LedgerReceipt {
            donation_id: self.donation.id,
            donation_transaction_id: self.donation_transaction.id,
            fee_transaction_id: self.fee_transaction.id,
        }
    }
}

/// Combined store interface
#[async_trait]
pub trait Store: Send + Sync {
    /// Get request repository
    fn requests(&self) -> &dyn RequestRepository;

    /// Get donation repository
    fn donations(&self) -> &dyn DonationRepository;

    /// Get transaction repository
    fn transactions(&self) -> &dyn TransactionRepository;

    /// Get notification repository
    fn notifications(&self) -> &dyn NotificationRepository;

    /// Get idempotency repository
    fn idempotency(&self) -> &dyn IdempotencyRepository;

    /// Commit all records of one payment atomically.
    ///
    /// In one unit: compare-and-swap the request on `expected_version`,
    /// insert the donation, both ledger lines and the outbox notification,
    /// and mark the idempotency key applied.
    ///
    /// # Errors
    /// - `NotFound` if the request does not exist
    /// - `Conflict` if the request version moved (nothing written)
    /// - `Duplicate` if the key was already applied (nothing written)
    async fn commit_donation(&self, commit: &DonationCommit) -> Result<(), StoreError>;
}
