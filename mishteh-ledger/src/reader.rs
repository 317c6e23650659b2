//! Read-only ledger queries.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use mishteh_domain::{
    Currency, Donation, DonationId, ExternalPaymentId, LedgerReceipt, Money, Notification, Request, RequestId,
    RequestStatus, Transaction, TransactionId, UserId,
};
use mishteh_store::{Store, StoreError};

use crate::error::{LedgerError, Result};
use crate::writer::LedgerResult;

/// Funding summary of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTotals {
    pub request_id: RequestId,
    pub title: String,
    pub currency: Currency,
    pub status: RequestStatus,
    pub target_amount: Option<Money>,
    pub current_amount: Money,
    /// Amount still needed; `None` without a target
    pub remaining: Option<Money>,
    pub donation_count: usize,
}

impl RequestTotals {
    fn new(request: &Request, donation_count: usize) -> Self {
        Self {
            request_id: request.id,
            title: request.title.clone(),
            currency: request.currency,
            status: request.status,
            target_amount: request.target_amount,
            current_amount: request.current_amount,
            remaining: request.remaining(),
            donation_count,
        }
    }
}

/// Query side of the ledger.
pub struct LedgerReader<S: Store> {
    store: Arc<S>,
}

impl<S: Store> LedgerReader<S> {
    /// Create a reader over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Current total and status of a request.
    pub async fn request_totals(&self, request_id: RequestId) -> Result<RequestTotals> {
        let request = self
            .store
            .requests()
            .find_by_id(request_id)
            .await?
            .ok_or(LedgerError::RequestNotFound { request_id })?;
        let donation_count = self.store.donations().count_by_request(request_id).await?;

        Ok(RequestTotals::new(&request, donation_count))
    }

    /// Look up a donation.
    pub async fn donation(&self, id: DonationId) -> Result<Option<Donation>> {
        Ok(self.store.donations().find_by_id(id).await?)
    }

    /// Donations to a request, oldest first.
    ///
    /// Fails with `RequestNotFound` for an unknown request.
    pub async fn donations_for_request(&self, request_id: RequestId) -> Result<Vec<Donation>> {
        if self.store.requests().find_by_id(request_id).await?.is_none() {
            return Err(LedgerError::RequestNotFound { request_id });
        }
        Ok(self.store.donations().find_by_request(request_id).await?)
    }

    /// Donation history of a donor, newest first.
    pub async fn donations_by_donor(&self, donor_id: UserId) -> Result<Vec<Donation>> {
        Ok(self.store.donations().find_by_donor(donor_id).await?)
    }

    /// Look up a ledger line.
    pub async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.store.transactions().find_by_id(id).await?)
    }

    /// Ledger lines recorded for a gateway payment id.
    ///
    /// For `ORDER` this is the DONATION line and its `ORDER-fee` FEE line;
    /// an id that already carries the fee suffix returns only the FEE line.
    pub async fn transactions_by_payment_id(&self, payment_id: &str) -> Result<Vec<Transaction>> {
        let transactions = self.store.transactions();
        let mut lines = Vec::with_capacity(2);

        if let Some(line) = transactions.find_by_payment_id(payment_id).await? {
            lines.push(line);
        }
        if !payment_id.ends_with(ExternalPaymentId::FEE_SUFFIX) {
            let fee_leg = format!("{}{}", payment_id, ExternalPaymentId::FEE_SUFFIX);
            if let Some(line) = transactions.find_by_payment_id(&fee_leg).await? {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Notifications addressed to a user, newest first.
    pub async fn notifications_for_user(&self, user_id: UserId) -> Result<Vec<Notification>> {
        Ok(self.store.notifications().find_by_user(user_id).await?)
    }

    /// Load the records named by a stored receipt.
    ///
    /// A receipt whose records are missing means the store is inconsistent,
    /// reported as `StorageUnavailable`.
    pub async fn hydrate(&self, receipt: LedgerReceipt, replayed: bool) -> Result<LedgerResult> {
        let donation = self
            .store
            .donations()
            .find_by_id(receipt.donation_id)
            .await?
            .ok_or_else(|| missing("donation", receipt.donation_id))?;
        let donation_transaction = self
            .store
            .transactions()
            .find_by_id(receipt.donation_transaction_id)
            .await?
            .ok_or_else(|| missing("transaction", receipt.donation_transaction_id))?;
        let fee_transaction = self
            .store
            .transactions()
            .find_by_id(receipt.fee_transaction_id)
            .await?
            .ok_or_else(|| missing("transaction", receipt.fee_transaction_id))?;
        let request = self
            .store
            .requests()
            .find_by_id(donation.request_id)
            .await?
            .ok_or_else(|| missing("request", donation.request_id))?;

        Ok(LedgerResult {
            donation,
            donation_transaction,
            fee_transaction,
            request,
            replayed,
        })
    }
}

fn missing(entity_type: &str, id: uuid::Uuid) -> LedgerError {
    LedgerError::StorageUnavailable(StoreError::not_found(entity_type, id.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
