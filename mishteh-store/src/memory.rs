//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access; `commit_donation` holds
//! every write lock for the duration of the commit, so it is atomic with
//! respect to all other store operations.
//!
//! Lock scope: the table locks are store-wide, so commits to different
//! requests are serialized here (never across an `.await`, and only for the
//! in-memory inserts). The compare-and-swap itself is scoped to one request's
//! version, so such commits never conflict with each other. `PgStore` locks
//! only the request row; use it wherever commit throughput across requests
//! matters.

use crate::error::StoreError;
use crate::repository::{
    ClaimOutcome, DonationCommit, DonationRepository, IdempotencyRecord, IdempotencyRepository,
    NotificationRepository, RequestRepository, Store, TransactionRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use mishteh_domain::{
    DeliveryState, Donation, DonationId, ExternalPaymentId, Notification, NotificationId, Request,
    RequestId, Transaction, TransactionId, UserId,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use uuid::Uuid;

/// In-memory store for testing
pub struct MemoryStore {
    requests: RwLock<HashMap<RequestId, Request>>,
    donations: RwLock<Vec<Donation>>,
    transactions: RwLock<Vec<Transaction>>,
    notifications: RwLock<Vec<Notification>>,
    idempotency: RwLock<HashMap<String, IdempotencyRecord>>,
}

fn read<'a, T>(lock: &'a RwLock<T>, name: &str) -> Result<RwLockReadGuard<'a, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Unavailable(format!("{} lock poisoned", name)))
}

fn write<'a, T>(lock: &'a RwLock<T>, name: &str) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Unavailable(format!("{} lock poisoned", name)))
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            donations: RwLock::new(Vec::new()),
            transactions: RwLock::new(Vec::new()),
            notifications: RwLock::new(Vec::new()),
            idempotency: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of requests
    pub fn request_count(&self) -> usize {
        read(&self.requests, "requests").map(|r| r.len()).unwrap_or(0)
    }

    /// Get the number of donations
    pub fn donation_count(&self) -> usize {
        read(&self.donations, "donations").map(|d| d.len()).unwrap_or(0)
    }

    /// Get the number of ledger lines
    pub fn transaction_count(&self) -> usize {
        read(&self.transactions, "transactions").map(|t| t.len()).unwrap_or(0)
    }

    /// Get the number of notifications
    pub fn notification_count(&self) -> usize {
        read(&self.notifications, "notifications").map(|n| n.len()).unwrap_or(0)
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) -> Result<(), StoreError> {
        write(&self.idempotency, "idempotency")?.clear();
        write(&self.requests, "requests")?.clear();
        write(&self.donations, "donations")?.clear();
        write(&self.transactions, "transactions")?.clear();
        write(&self.notifications, "notifications")?.clear();
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Request Repository
// =============================================================================

#[async_trait]
impl RequestRepository for MemoryStore {
    async fn save(&self, request: &Request) -> Result<(), StoreError> {
        write(&self.requests, "requests")?.insert(request.id, request.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        Ok(read(&self.requests, "requests")?.get(&id).cloned())
    }

    async fn find_by_owner(&self, owner_id: UserId) -> Result<Vec<Request>, StoreError> {
        let requests = read(&self.requests, "requests")?;
        let mut owned: Vec<Request> =
            requests.values().filter(|r| r.owner_id == owner_id).cloned().collect();
        owned.sort_by_key(|r| r.created_at);
        Ok(owned)
    }
}

// =============================================================================
// Donation Repository
// =============================================================================

#[async_trait]
impl DonationRepository for MemoryStore {
    async fn find_by_id(&self, id: DonationId) -> Result<Option<Donation>, StoreError> {
        let donations = read(&self.donations, "donations")?;
        Ok(donations.iter().find(|d| d.id == id).cloned())
    }

    async fn find_by_request(&self, request_id: RequestId) -> Result<Vec<Donation>, StoreError> {
        let donations = read(&self.donations, "donations")?;
        Ok(donations.iter().filter(|d| d.request_id == request_id).cloned().collect())
    }

    async fn count_by_request(&self, request_id: RequestId) -> Result<usize, StoreError> {
        let donations = read(&self.donations, "donations")?;
        Ok(donations.iter().filter(|d| d.request_id == request_id).count())
    }

    async fn find_by_donor(&self, donor_id: UserId) -> Result<Vec<Donation>, StoreError> {
        let donations = read(&self.donations, "donations")?;
        Ok(donations.iter().rev().filter(|d| d.donor_id == donor_id).cloned().collect())
    }

    async fn find_by_payment_id(
        &self,
        payment_id: &ExternalPaymentId,
    ) -> Result<Option<Donation>, StoreError> {
        let donations = read(&self.donations, "donations")?;
        Ok(donations.iter().find(|d| &d.external_payment_id == payment_id).cloned())
    }
}

// =============================================================================
// Transaction Repository
// =============================================================================

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let transactions = read(&self.transactions, "transactions")?;
        Ok(transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>, StoreError> {
        let transactions = read(&self.transactions, "transactions")?;
        Ok(transactions.iter().find(|t| t.payment_id == payment_id).cloned())
    }

    async fn find_by_donation(
        &self,
        donation_id: DonationId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let transactions = read(&self.transactions, "transactions")?;
        Ok(transactions.iter().filter(|t| t.donation_id == donation_id).cloned().collect())
    }

    async fn find_by_request(&self, request_id: RequestId) -> Result<Vec<Transaction>, StoreError> {
        let transactions = read(&self.transactions, "transactions")?;
        Ok(transactions.iter().filter(|t| t.request_id == request_id).cloned().collect())
    }
}

// =============================================================================
// Notification Repository
// =============================================================================

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn find_by_id(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        let notifications = read(&self.notifications, "notifications")?;
        Ok(notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Notification>, StoreError> {
        let notifications = read(&self.notifications, "notifications")?;
        Ok(notifications.iter().rev().filter(|n| n.user_id == user_id).cloned().collect())
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<Notification>, StoreError> {
        let notifications = read(&self.notifications, "notifications")?;
        Ok(notifications.iter().filter(|n| n.is_pending()).take(limit).cloned().collect())
    }

    async fn mark_delivered(&self, id: NotificationId) -> Result<(), StoreError> {
        let mut notifications = write(&self.notifications, "notifications")?;
        let notification = notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::not_found("notification", id.to_string()))?;

        if notification.is_pending() {
            notification.delivery = DeliveryState::Delivered;
            notification.delivered_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_failed_attempt(&self, id: NotificationId) -> Result<(), StoreError> {
        let mut notifications = write(&self.notifications, "notifications")?;
        let notification = notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::not_found("notification", id.to_string()))?;

        notification.attempts += 1;
        Ok(())
    }
}

// =============================================================================
// Idempotency Repository
// =============================================================================

#[async_trait]
impl IdempotencyRepository for MemoryStore {
    async fn try_claim(
        &self,
        key: &ExternalPaymentId,
        token: Uuid,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut keys = write(&self.idempotency, "idempotency")?;
        let now = Utc::now();

        match keys.get_mut(key.as_str()) {
            None => {
                keys.insert(
                    key.as_str().to_string(),
                    IdempotencyRecord {
                        key: key.as_str().to_string(),
                        claim_token: token,
                        claimed_at: now,
                        receipt: None,
                        applied_at: None,
                    },
                );
                Ok(ClaimOutcome::Acquired { taken_over: false })
            },
            Some(record) => {
                if let Some(receipt) = record.receipt {
                    Ok(ClaimOutcome::Applied(receipt))
                } else if record.lease_expired(now, lease) {
                    record.claim_token = token;
                    record.claimed_at = now;
                    Ok(ClaimOutcome::Acquired { taken_over: true })
                } else {
                    Ok(ClaimOutcome::InFlight { claimed_at: record.claimed_at })
                }
            },
        }
    }

    async fn release(&self, key: &ExternalPaymentId, token: Uuid) -> Result<bool, StoreError> {
        let mut keys = write(&self.idempotency, "idempotency")?;
        let releasable = keys
            .get(key.as_str())
            .map(|r| !r.is_applied() && r.claim_token == token)
            .unwrap_or(false);

        if releasable {
            keys.remove(key.as_str());
        }
        Ok(releasable)
    }

    async fn find(&self, key: &ExternalPaymentId) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(read(&self.idempotency, "idempotency")?.get(key.as_str()).cloned())
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for MemoryStore {
    fn requests(&self) -> &dyn RequestRepository {
        self
    }

    fn donations(&self) -> &dyn DonationRepository {
        self
    }

    fn transactions(&self) -> &dyn TransactionRepository {
        self
    }

    fn notifications(&self) -> &dyn NotificationRepository {
        self
    }

    fn idempotency(&self) -> &dyn IdempotencyRepository {
        self
    }

    async fn commit_donation(&self, commit: &DonationCommit) -> Result<(), StoreError> {
        // Fixed lock order; every check happens before the first write.
        let mut keys = write(&self.idempotency, "idempotency")?;
        let mut requests = write(&self.requests, "requests")?;
        let mut donations = write(&self.donations, "donations")?;
        let mut transactions = write(&self.transactions, "transactions")?;
        let mut notifications = write(&self.notifications, "notifications")?;

        let key = commit.idempotency_key.as_str();
        if keys.get(key).map(|r| r.is_applied()).unwrap_or(false) {
            return Err(StoreError::duplicate("idempotency_key", key));
        }
        for line in [&commit.donation_transaction, &commit.fee_transaction] {
            if transactions.iter().any(|t| t.payment_id == line.payment_id) {
                return Err(StoreError::duplicate("transaction", line.payment_id.as_str()));
            }
        }

        let request_id = commit.request.id;
        let current = requests
            .get(&request_id)
            .ok_or_else(|| StoreError::not_found("request", request_id.to_string()))?;
        if current.version != commit.expected_version {
            return Err(StoreError::conflict(
                "request",
                request_id.to_string(),
                commit.expected_version,
            ));
        }

        let now = Utc::now();
        requests.insert(request_id, commit.request.clone());
        donations.push(commit.donation.clone());
        transactions.push(commit.donation_transaction.clone());
        transactions.push(commit.fee_transaction.clone());
        if let Some(notification) = &commit.notification {
            notifications.push(notification.clone());
        }

        let record = keys.entry(key.to_string()).or_insert_with(|| IdempotencyRecord {
            key: key.to_string(),
            claim_token: Uuid::nil(),
            claimed_at: now,
            receipt: None,
            applied_at: None,
        });
        record.receipt = Some(commit.receipt());
        record.applied_at = Some(now);

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
