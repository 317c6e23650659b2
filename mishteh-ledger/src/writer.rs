//! Ledger writer: the single write path for captured payments.
//!
//! # Flow
//!
//! ```text
//! RecordDonation → claim payment id → apply fee → decide funding → commit → notify
//!                        │                                  ▲
//!                        │                                  └── version conflict: reload, re-decide
//!                        └── already applied: return stored result
//! ```
//!
//! Everything a payment produces (donation, both ledger lines, the request
//! update, the outbox notification and the APPLIED marker) is written by one
//! `Store::commit_donation` call, so it lands completely or not at all.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mishteh_domain::{
    Donation, ExternalPaymentId, Money, Notification, Request, RequestId, Transaction,
    TransactionType, UserId, ANONYMOUS_DONOR,
};
use mishteh_engine::{decide, FeeBreakdown, FeePolicy, FundingDecision};
use mishteh_store::{DonationCommit, Store, StoreError};

use crate::error::{LedgerError, Result};
use crate::guard::{Claim, IdempotencyGuard};
use crate::outbox::OutboxRelay;
use crate::ports::NotificationSink;
use crate::reader::LedgerReader;

// =============================================================================
// Configuration
// =============================================================================

/// Tunables of the ledger writer.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub fee_policy: FeePolicy,
    /// Reload-and-retry attempts after a lost compare-and-swap
    pub max_conflict_retries: u32,
    /// Write no notification at all for anonymous donations
    pub suppress_anonymous_notifications: bool,
    /// Wait between checks while another caller holds a payment id
    pub claim_poll: Duration,
    /// Age after which an unapplied claim is presumed abandoned
    pub claim_lease: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            fee_policy: FeePolicy::standard(),
            max_conflict_retries: 16,
            suppress_anonymous_notifications: false,
            claim_poll: Duration::from_millis(25),
            claim_lease: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Command / Result
// =============================================================================

/// A payment captured by the gateway, to be recorded as a donation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDonation {
    pub request_id: RequestId,
    pub donor_id: UserId,
    /// Donor display name; blank falls back to "Anonymous"
    pub donor_name: String,
    /// Captured gross amount (gateway ground truth)
    pub gross_amount: Money,
    pub message: Option<String>,
    pub anonymous: bool,
    /// Gateway payment id, the idempotency key
    pub external_payment_id: String,
    pub payer_id: Option<String>,
    /// Gateway name recorded on ledger lines (e.g., "PAYPAL")
    pub payment_gateway: String,
}

/// Records produced (or previously produced) for one payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerResult {
    pub donation: Donation,
    pub donation_transaction: Transaction,
    pub fee_transaction: Transaction,
    /// Request as of the commit (or as of the read, for replays)
    pub request: Request,
    /// True if the payment had already been applied by an earlier call
    pub replayed: bool,
}

// =============================================================================
// Ledger Writer
// =============================================================================

/// Records captured payments with exactly-once semantics per payment id.
pub struct LedgerWriter<S: Store, N: NotificationSink> {
    store: Arc<S>,
    guard: IdempotencyGuard<S>,
    reader: LedgerReader<S>,
    relay: OutboxRelay<S, N>,
    config: LedgerConfig,
}

impl<S: Store, N: NotificationSink> LedgerWriter<S, N> {
    /// Create a new writer.
    pub fn new(store: Arc<S>, sink: Arc<N>, config: LedgerConfig) -> Self {
        Self {
            guard: IdempotencyGuard::new(Arc::clone(&store), config.claim_poll, config.claim_lease),
            reader: LedgerReader::new(Arc::clone(&store)),
            relay: OutboxRelay::new(Arc::clone(&store), sink),
            store,
            config,
        }
    }

    /// Record a completed donation.
    ///
    /// Replays of an applied payment id return the stored records with
    /// `replayed = true` and write nothing.
    ///
    /// # Errors
    /// - `InvalidCommand` / `InvalidAmount` / `CurrencyMismatch` for bad input
    /// - `RequestNotFound` / `RequestNotAcceptingFunds` from the funding decision
    /// - `StorageConflict` after `max_conflict_retries` lost compare-and-swaps
    /// - `StorageUnavailable` if the store fails
    ///
    /// Nothing is persisted when an error is returned.
    pub async fn record_completed_donation(&self, cmd: RecordDonation) -> Result<LedgerResult> {
        // 1. Claim the payment id; an applied payment replays whatever the
        // current fee policy says
        let key = ExternalPaymentId::new(cmd.external_payment_id.as_str())?;
        let claim = self.guard.try_claim(&key).await?;
        if let Some(receipt) = claim.prior_result {
            warn!(payment_id = %key, request_id = %cmd.request_id, "Payment already applied, returning stored result");
            return self.reader.hydrate(receipt, true).await;
        }

        // 2. Price the gift under the claim
        let fee = match self.config.fee_policy.apply(&cmd.gross_amount) {
            Ok(fee) => fee,
            Err(e) => {
                self.release_quietly(&claim).await;
                return Err(LedgerError::from_engine(e, cmd.request_id));
            },
        };

        // 3. Decide and commit
        let commit = match self.commit_with_retry(&cmd, &key, &fee).await {
            Ok(commit) => commit,
            Err(LedgerError::DuplicatePayment { .. }) => return self.replay_applied(&key).await,
            Err(e) => {
                self.release_quietly(&claim).await;
                return Err(e);
            },
        };

        info!(
            payment_id = %key,
            request_id = %commit.request.id,
            donation_id = %commit.donation.id,
            gross = %fee.gross,
            fee = %fee.fee,
            net = %fee.net,
            total = %commit.request.current_amount,
            status = %commit.request.status,
            "Donation recorded"
        );

        // 4. Hand the notification to the sink; failures stay in the outbox
        if let Some(notification) = &commit.notification {
            self.relay.deliver(notification).await;
        }

        Ok(LedgerResult {
            donation: commit.donation,
            donation_transaction: commit.donation_transaction,
            fee_transaction: commit.fee_transaction,
            request: commit.request,
            replayed: false,
        })
    }

    /// Reload, re-decide and commit until the compare-and-swap lands.
    async fn commit_with_retry(
        &self,
        cmd: &RecordDonation,
        key: &ExternalPaymentId,
        fee: &FeeBreakdown,
    ) -> Result<DonationCommit> {
        let request_id = cmd.request_id;
        let mut attempt: u32 = 0;

        loop {
            let request = self
                .store
                .requests()
                .find_by_id(request_id)
                .await?
                .ok_or(LedgerError::RequestNotFound { request_id })?;

            let decision = decide(&request, &cmd.gross_amount)
                .map_err(|e| LedgerError::from_engine(e, request_id))?;

            let commit = self.build_commit(cmd, key, fee, &request, &decision);

            match self.store.commit_donation(&commit).await {
                Ok(()) => return Ok(commit),
                Err(StoreError::Conflict { .. }) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    debug!(payment_id = %key, %request_id, attempt, "Request version moved, retrying");
                },
                Err(StoreError::Conflict { .. }) => {
                    return Err(LedgerError::StorageConflict(format!(
                        "request {} still contended after {} retries",
                        request_id, self.config.max_conflict_retries
                    )));
                },
                Err(StoreError::Duplicate { .. }) => {
                    return Err(LedgerError::DuplicatePayment {
                        external_payment_id: key.as_str().to_string(),
                    });
                },
                Err(StoreError::NotFound { .. }) => {
                    return Err(LedgerError::RequestNotFound { request_id });
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Build every record of one payment against a loaded request.
    fn build_commit(
        &self,
        cmd: &RecordDonation,
        key: &ExternalPaymentId,
        fee: &FeeBreakdown,
        request: &Request,
        decision: &FundingDecision,
    ) -> DonationCommit {
        let now = Utc::now();
        let donor_name = match cmd.donor_name.trim() {
            "" => ANONYMOUS_DONOR,
            name => name,
        };

        let mut updated = request.clone();
        updated.current_amount = decision.new_amount;
        updated.status = decision.new_status;
        updated.version = request.version + 1;
        updated.updated_at = now;

        let donation = Donation::completed(
            request.id,
            cmd.donor_id,
            fee.gross,
            cmd.message.clone(),
            cmd.anonymous,
            cmd.payment_gateway.as_str(),
            key.clone(),
        );

        let donation_transaction = Transaction {
            id: Uuid::now_v7(),
            tx_type: TransactionType::Donation,
            amount: fee.gross,
            fee_amount: fee.fee,
            net_amount: fee.net,
            payment_gateway: cmd.payment_gateway.clone(),
            payment_id: key.as_str().to_string(),
            payer_id: cmd.payer_id.clone(),
            donor_id: cmd.donor_id,
            donor_name: if cmd.anonymous { ANONYMOUS_DONOR } else { donor_name }.to_string(),
            recipient_id: request.owner_id,
            donation_id: donation.id,
            request_id: request.id,
            completed_at: now,
        };

        // The platform's own line keeps the real donor for reconciliation
        let fee_transaction = Transaction {
            id: Uuid::now_v7(),
            tx_type: TransactionType::Fee,
            amount: fee.fee,
            fee_amount: Money::zero(fee.fee.currency()),
            net_amount: fee.fee,
            payment_gateway: cmd.payment_gateway.clone(),
            payment_id: key.fee_leg(),
            payer_id: None,
            donor_id: cmd.donor_id,
            donor_name: donor_name.to_string(),
            recipient_id: request.owner_id,
            donation_id: donation.id,
            request_id: request.id,
            completed_at: now,
        };

        let notification = match (cmd.anonymous, self.config.suppress_anonymous_notifications) {
            (true, true) => None,
            (true, false) => Some(Notification::donation_received(request, &fee.gross, None)),
            (false, _) => Some(Notification::donation_received(request, &fee.gross, Some(donor_name))),
        };

        DonationCommit {
            request: updated,
            expected_version: request.version,
            donation,
            donation_transaction,
            fee_transaction,
            notification,
            idempotency_key: key.clone(),
        }
    }

    /// Another holder applied the payment first (stale-claim takeover race).
    async fn replay_applied(&self, key: &ExternalPaymentId) -> Result<LedgerResult> {
        let receipt = self
            .store
            .idempotency()
            .find(key)
            .await?
            .and_then(|record| record.receipt)
            .ok_or_else(|| LedgerError::DuplicatePayment {
                external_payment_id: key.as_str().to_string(),
            })?;

        warn!(payment_id = %key, "Payment applied concurrently, returning stored result");
        self.reader.hydrate(receipt, true).await
    }

    async fn release_quietly(&self, claim: &Claim) {
        if let Err(e) = self.guard.release(claim).await {
            warn!(payment_id = %claim.key, error = %e, "Failed to release idempotency claim");
        }
    }

    /// Read-only queries over the same store.
    pub fn reader(&self) -> &LedgerReader<S> {
        &self.reader
    }

    /// Outbox relay sharing this writer's sink.
    pub fn relay(&self) -> &OutboxRelay<S, N> {
        &self.relay
    }

    /// Get the writer configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Get the store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

// =============================================================================
// Tests
// =============================================================================
