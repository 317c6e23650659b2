//! PostgreSQL store implementation (feature `postgres`).
//!
//! `commit_donation` runs in a single transaction: the idempotency upsert,
//! the request compare-and-swap and every insert either all land or none do.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.

use crate::error::StoreError;
use crate::repository::{
    ClaimOutcome, DonationCommit, DonationRepository, IdempotencyRecord, IdempotencyRepository,
    NotificationRepository, RequestRepository, Store, TransactionRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mishteh_domain::{
    Currency, DeliveryState, Donation, DonationId, ExternalPaymentId, LedgerReceipt, Money,
    Notification, NotificationId, Request, RequestId, Transaction, TransactionId, UserId,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// PostgreSQL-backed ledger store
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    /// Create a new store over an existing pool
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse<T: std::str::FromStr<Err = mishteh_domain::DomainError>>(
    value: &str,
) -> Result<T, StoreError> {
    value
        .parse::<T>()
        .map_err(|e| StoreError::Deserialization(format!("{}: {}", value, e)))
}

fn money(row: &PgRow, column: &str, currency: Currency) -> Result<Money, StoreError> {
    let amount: Decimal = row.try_get(column)?;
    Ok(Money::new(amount, currency)?)
}

fn delivery_to_str(delivery: DeliveryState) -> &'static str {
    match delivery {
        DeliveryState::Pending => "PENDING",
        DeliveryState::Delivered => "DELIVERED",
    }
}

fn delivery_from_str(value: &str) -> Result<DeliveryState, StoreError> {
    match value {
        "PENDING" => Ok(DeliveryState::Pending),
        "DELIVERED" => Ok(DeliveryState::Delivered),
        other => Err(StoreError::Deserialization(format!("Invalid delivery state: {}", other))),
    }
}

fn request_from_row(row: &PgRow) -> Result<Request, StoreError> {
    let currency: Currency = parse(row.try_get::<String, _>("currency")?.as_str())?;
    let target: Option<Decimal> = row.try_get("target_amount")?;

    Ok(Request {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        title: row.try_get("title")?,
        currency,
        target_amount: target.map(|t| Money::new(t, currency)).transpose()?,
        current_amount: money(row, "current_amount", currency)?,
        status: parse(row.try_get::<String, _>("status")?.as_str())?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn donation_from_row(row: &PgRow) -> Result<Donation, StoreError> {
    let currency: Currency = parse(row.try_get::<String, _>("currency")?.as_str())?;
    let external: String = row.try_get("external_payment_id")?;

    Ok(Donation {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        donor_id: row.try_get("donor_id")?,
        amount: money(row, "amount", currency)?,
        message: row.try_get("message")?,
        anonymous: row.try_get("anonymous")?,
        payment_status: parse(row.try_get::<String, _>("payment_status")?.as_str())?,
        payment_method: row.try_get("payment_method")?,
        external_payment_id: ExternalPaymentId::new(external)?,
        created_at: row.try_get("created_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let currency: Currency = parse(row.try_get::<String, _>("currency")?.as_str())?;

    Ok(Transaction {
        id: row.try_get("id")?,
        tx_type: parse(row.try_get::<String, _>("tx_type")?.as_str())?,
        amount: money(row, "amount", currency)?,
        fee_amount: money(row, "fee_amount", currency)?,
        net_amount: money(row, "net_amount", currency)?,
        payment_gateway: row.try_get("payment_gateway")?,
        payment_id: row.try_get("payment_id")?,
        payer_id: row.try_get("payer_id")?,
        donor_id: row.try_get("donor_id")?,
        donor_name: row.try_get("donor_name")?,
        recipient_id: row.try_get("recipient_id")?,
        donation_id: row.try_get("donation_id")?,
        request_id: row.try_get("request_id")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    let attempts: i32 = row.try_get("attempts")?;

    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: parse(row.try_get::<String, _>("kind")?.as_str())?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        link: row.try_get("link")?,
        read: row.try_get("read")?,
        delivery: delivery_from_str(row.try_get::<String, _>("delivery")?.as_str())?,
        attempts: u32::try_from(attempts)
            .map_err(|_| StoreError::Deserialization(format!("Negative attempts: {}", attempts)))?,
        created_at: row.try_get("created_at")?,
        delivered_at: row.try_get("delivered_at")?,
    })
}

fn idempotency_from_row(row: &PgRow) -> Result<IdempotencyRecord, StoreError> {
    let applied_at: Option<DateTime<Utc>> = row.try_get("applied_at")?;
    let donation_id: Option<Uuid> = row.try_get("donation_id")?;
    let donation_transaction_id: Option<Uuid> = row.try_get("donation_transaction_id")?;
    let fee_transaction_id: Option<Uuid> = row.try_get("fee_transaction_id")?;

    let receipt = match (applied_at, donation_id, donation_transaction_id, fee_transaction_id) {
        (Some(_), Some(donation_id), Some(donation_transaction_id), Some(fee_transaction_id)) => {
            Some(LedgerReceipt {
                donation_id,
                donation_transaction_id,
                fee_transaction_id,
            })
        },
        _ => None,
    };

    Ok(IdempotencyRecord {
        key: row.try_get("key")?,
        claim_token: row.try_get("claim_token")?,
        claimed_at: row.try_get("claimed_at")?,
        receipt,
        applied_at,
    })
}

const REQUEST_COLUMNS: &str = "id, owner_id, title, currency, target_amount, current_amount, \
                               status, version, created_at, updated_at";

const DONATION_COLUMNS: &str = "id, request_id, donor_id, amount, currency, message, anonymous, \
                                payment_status, payment_method, external_payment_id, created_at";

const TRANSACTION_COLUMNS: &str = "id, tx_type, amount, fee_amount, net_amount, currency, \
                                   payment_gateway, payment_id, payer_id, donor_id, donor_name, \
                                   recipient_id, donation_id, request_id, completed_at";

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, message, link, read, delivery, \
                                    attempts, created_at, delivered_at";

const IDEMPOTENCY_COLUMNS: &str = "key, claim_token, claimed_at, donation_id, \
                                   donation_transaction_id, fee_transaction_id, applied_at";

// =============================================================================
// Request Repository
// =============================================================================

#[async_trait]
impl RequestRepository for PgStore {
    async fn save(&self, request: &Request) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO requests (id, owner_id, title, currency, target_amount, current_amount,
                                  status, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                target_amount = EXCLUDED.target_amount,
                current_amount = EXCLUDED.current_amount,
                status = EXCLUDED.status,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(request.id)
        .bind(request.owner_id)
        .bind(&request.title)
        .bind(request.currency.code())
        .bind(request.target_amount.as_ref().map(|t| t.amount()))
        .bind(request.current_amount.amount())
        .bind(request.status.as_str())
        .bind(request.version)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM requests WHERE id = $1", REQUEST_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn find_by_owner(&self, owner_id: UserId) -> Result<Vec<Request>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM requests WHERE owner_id = $1 ORDER BY created_at ASC",
            REQUEST_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(request_from_row).collect()
    }
}

// =============================================================================
// Donation Repository
// =============================================================================

#[async_trait]
impl DonationRepository for PgStore {
    async fn find_by_id(&self, id: DonationId) -> Result<Option<Donation>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM donations WHERE id = $1", DONATION_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.as_ref().map(donation_from_row).transpose()
    }

    async fn find_by_request(&self, request_id: RequestId) -> Result<Vec<Donation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM donations WHERE request_id = $1 ORDER BY created_at ASC, id ASC",
            DONATION_COLUMNS
        ))
        .bind(request_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(donation_from_row).collect()
    }

    async fn count_by_request(&self, request_id: RequestId) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM donations WHERE request_id = $1")
            .bind(request_id)
            .fetch_one(self.pool.as_ref())
            .await?;

        usize::try_from(count).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    async fn find_by_donor(&self, donor_id: UserId) -> Result<Vec<Donation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM donations WHERE donor_id = $1 ORDER BY created_at DESC, id DESC",
            DONATION_COLUMNS
        ))
        .bind(donor_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(donation_from_row).collect()
    }

    async fn find_by_payment_id(
        &self,
        payment_id: &ExternalPaymentId,
    ) -> Result<Option<Donation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM donations WHERE external_payment_id = $1",
            DONATION_COLUMNS
        ))
        .bind(payment_id.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(donation_from_row).transpose()
    }
}

// =============================================================================
// Transaction Repository
// =============================================================================

#[async_trait]
impl TransactionRepository for PgStore {
    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE payment_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn find_by_donation(
        &self,
        donation_id: DonationId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE donation_id = $1 ORDER BY tx_type ASC",
            TRANSACTION_COLUMNS
        ))
        .bind(donation_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn find_by_request(&self, request_id: RequestId) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE request_id = $1 ORDER BY completed_at ASC, id ASC",
            TRANSACTION_COLUMNS
        ))
        .bind(request_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }
}

// =============================================================================
// Notification Repository
// =============================================================================

#[async_trait]
impl NotificationRepository for PgStore {
    async fn find_by_id(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE user_id = $1 ORDER BY created_at DESC",
            NOTIFICATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE delivery = 'PENDING' \
             ORDER BY created_at ASC LIMIT $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_delivered(&self, id: NotificationId) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET delivery = 'DELIVERED', delivered_at = COALESCE(delivered_at, NOW())
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("notification", id.to_string()));
        }
        Ok(())
    }

    async fn record_failed_attempt(&self, id: NotificationId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE notifications SET attempts = attempts + 1 WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("notification", id.to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Idempotency Repository
// =============================================================================

#[async_trait]
impl IdempotencyRepository for PgStore {
    async fn try_claim(
        &self,
        key: &ExternalPaymentId,
        token: Uuid,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        // Inserts a fresh claim, or replaces a stale unapplied one.
        // `xmax = 0` distinguishes the insert from the takeover.
        let claimed = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, claim_token, claimed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                claim_token = EXCLUDED.claim_token,
                claimed_at = EXCLUDED.claimed_at
            WHERE idempotency_keys.applied_at IS NULL
              AND idempotency_keys.claimed_at < NOW() - make_interval(secs => $3)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(key.as_str())
        .bind(token)
        .bind(lease.as_secs_f64())
        .fetch_optional(self.pool.as_ref())
        .await?;

        if let Some(row) = claimed {
            let inserted: bool = row.try_get("inserted")?;
            return Ok(ClaimOutcome::Acquired { taken_over: !inserted });
        }

        match self.find(key).await? {
            Some(IdempotencyRecord { receipt: Some(receipt), .. }) => {
                Ok(ClaimOutcome::Applied(receipt))
            },
            Some(record) => Ok(ClaimOutcome::InFlight { claimed_at: record.claimed_at }),
            // Released between the two statements; the caller polls again.
            None => Ok(ClaimOutcome::InFlight { claimed_at: Utc::now() }),
        }
    }

    async fn release(&self, key: &ExternalPaymentId, token: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM idempotency_keys WHERE key = $1 AND claim_token = $2 AND applied_at IS NULL",
        )
        .bind(key.as_str())
        .bind(token)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, key: &ExternalPaymentId) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM idempotency_keys WHERE key = $1",
            IDEMPOTENCY_COLUMNS
        ))
        .bind(key.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(idempotency_from_row).transpose()
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for PgStore {
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
        let key = commit.idempotency_key.as_str();
        let receipt = commit.receipt();
        let mut tx = self.pool.begin().await?;

        // 1. Mark the key applied. A concurrent applier blocks on the row
        //    lock and then sees applied_at set, so it updates nothing.
        let marked = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, claim_token, claimed_at, donation_id,
                                          donation_transaction_id, fee_transaction_id, applied_at)
            VALUES ($1, $2, NOW(), $3, $4, $5, NOW())
            ON CONFLICT (key) DO UPDATE SET
                donation_id = EXCLUDED.donation_id,
                donation_transaction_id = EXCLUDED.donation_transaction_id,
                fee_transaction_id = EXCLUDED.fee_transaction_id,
                applied_at = EXCLUDED.applied_at
            WHERE idempotency_keys.applied_at IS NULL
            "#,
        )
        .bind(key)
        .bind(Uuid::nil())
        .bind(receipt.donation_id)
        .bind(receipt.donation_transaction_id)
        .bind(receipt.fee_transaction_id)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            return Err(StoreError::duplicate("idempotency_key", key));
        }

        // 2. Compare-and-swap the request funding fields
        let request = &commit.request;
        let swapped = sqlx::query(
            r#"
            UPDATE requests
            SET current_amount = $1, status = $2, version = $3, updated_at = $4
            WHERE id = $5 AND version = $6
            "#,
        )
        .bind(request.current_amount.amount())
        .bind(request.status.as_str())
        .bind(request.version)
        .bind(request.updated_at)
        .bind(request.id)
        .bind(commit.expected_version)
        .execute(&mut *tx)
        .await?;

        if swapped.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM requests WHERE id = $1")
                .bind(request.id)
                .fetch_optional(&mut *tx)
                .await?;

            return Err(match exists {
                None => StoreError::not_found("request", request.id.to_string()),
                Some(_) => {
                    StoreError::conflict("request", request.id.to_string(), commit.expected_version)
                },
            });
        }

        // 3. Donation, ledger lines, outbox
        let donation = &commit.donation;
        sqlx::query(
            r#"
            INSERT INTO donations (id, request_id, donor_id, amount, currency, message, anonymous,
                                   payment_status, payment_method, external_payment_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(donation.id)
        .bind(donation.request_id)
        .bind(donation.donor_id)
        .bind(donation.amount.amount())
        .bind(donation.amount.currency().code())
        .bind(donation.message.as_deref())
        .bind(donation.anonymous)
        .bind(donation.payment_status.as_str())
        .bind(&donation.payment_method)
        .bind(donation.external_payment_id.as_str())
        .bind(donation.created_at)
        .execute(&mut *tx)
        .await?;

        for line in [&commit.donation_transaction, &commit.fee_transaction] {
            sqlx::query(
                r#"
                INSERT INTO transactions (id, tx_type, amount, fee_amount, net_amount, currency,
                                          payment_gateway, payment_id, payer_id, donor_id,
                                          donor_name, recipient_id, donation_id, request_id,
                                          completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(line.id)
            .bind(line.tx_type.as_str())
            .bind(line.amount.amount())
            .bind(line.fee_amount.amount())
            .bind(line.net_amount.amount())
            .bind(line.currency().code())
            .bind(&line.payment_gateway)
            .bind(&line.payment_id)
            .bind(line.payer_id.as_deref())
            .bind(line.donor_id)
            .bind(&line.donor_name)
            .bind(line.recipient_id)
            .bind(line.donation_id)
            .bind(line.request_id)
            .bind(line.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(notification) = &commit.notification {
            sqlx::query(
                r#"
                INSERT INTO notifications (id, user_id, kind, title, message, link, read,
                                           delivery, attempts, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(notification.id)
            .bind(notification.user_id)
            .bind(notification.kind.as_str())
            .bind(&notification.title)
            .bind(&notification.message)
            .bind(notification.link.as_deref())
            .bind(notification.read)
            .bind(delivery_to_str(notification.delivery))
            .bind(i32::try_from(notification.attempts).unwrap_or(i32::MAX))
            .bind(notification.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            payment_id = %key,
            request_id = %request.id,
            version = request.version,
            "Donation committed"
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
