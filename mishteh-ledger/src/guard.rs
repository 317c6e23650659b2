//! Idempotency guard for payment confirmations.
//!
//! Each external payment id is applied to the ledger at most once, even
//! when the same confirmation arrives concurrently or is retried.
//!
//! # Flow
//!
//! 1. Claim the payment id (atomic insert-if-absent in the store)
//! 2. Apply the donation; the commit marks the key APPLIED with a receipt
//! 3. On failure, release the claim so a later retry can claim it
//!
//! Callers that lose the claim wait for the holder to finish and then read
//! the stored receipt. A claim older than the lease is presumed abandoned
//! and is taken over by exactly one waiter.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use mishteh_domain::{ExternalPaymentId, LedgerReceipt};
use mishteh_store::{ClaimOutcome, Store};

use crate::error::Result;

/// Outcome of claiming a payment id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Payment id that was claimed
    pub key: ExternalPaymentId,
    /// Token identifying this holder (needed to release)
    pub token: Uuid,
    /// True if this caller must apply the payment
    pub first_claim: bool,
    /// Stored receipt if the payment was already applied
    pub prior_result: Option<LedgerReceipt>,
}

impl Claim {
    /// Check if the payment was applied by an earlier call
    pub fn is_replay(&self) -> bool {
        self.prior_result.is_some()
    }
}

/// Guard serializing confirmations of the same payment id.
pub struct IdempotencyGuard<S: Store> {
    store: Arc<S>,
    /// How long to wait between checks while another caller holds the claim
    poll_interval: Duration,
    /// Age after which an unapplied claim may be taken over
    lease: Duration,
}

impl<S: Store> IdempotencyGuard<S> {
    /// Create a new guard.
    pub fn new(store: Arc<S>, poll_interval: Duration, lease: Duration) -> Self {
        Self { store, poll_interval, lease }
    }

    /// Claim a payment id, waiting while another caller holds it.
    ///
    /// Returns either a first claim (apply the payment now) or the receipt
    /// of the earlier application.
    pub async fn try_claim(&self, key: &ExternalPaymentId) -> Result<Claim> {
        let token = Uuid::now_v7();

        loop {
            match self.store.idempotency().try_claim(key, token, self.lease).await? {
                ClaimOutcome::Acquired { taken_over } => {
                    if taken_over {
                        warn!(payment_id = %key, "Took over stale idempotency claim");
                    }
                    return Ok(Claim {
                        key: key.clone(),
                        token,
                        first_claim: true,
                        prior_result: None,
                    });
                },
                ClaimOutcome::Applied(receipt) => {
                    return Ok(Claim {
                        key: key.clone(),
                        token,
                        first_claim: false,
                        prior_result: Some(receipt),
                    });
                },
                ClaimOutcome::InFlight { claimed_at } => {
                    debug!(payment_id = %key, %claimed_at, "Payment in flight, waiting");
                    tokio::time::sleep(self.poll_interval).await;
                },
            }
        }
    }

    /// Release a claim whose holder failed before committing.
    pub async fn release(&self, claim: &Claim) -> Result<()> {
        if !claim.first_claim {
            return Ok(());
        }

        let released = self.store.idempotency().release(&claim.key, claim.token).await?;
        if !released {
            debug!(payment_id = %claim.key, "Claim already gone or taken over");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
