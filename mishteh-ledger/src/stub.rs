//! Stub implementations for testing.
//!
//! These implementations simulate gateway capture and notification delivery
//! without making real API calls.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use mishteh_domain::{Currency, Notification, NotificationId};

use crate::error::LedgerError;
use crate::ports::{CaptureResult, CaptureStatus, NotificationSink, PayerIdentity, PaymentCapturePort};

/// Stub state is plain data; a panic mid-update cannot leave it inconsistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Stub Payment Capture
// =============================================================================

/// Stub payment gateway for testing.
///
/// Orders are registered up front; capturing an order returns the configured
/// result. Capturing the same order again returns the same result, as a real
/// gateway does for an already-captured order.
pub struct StubPaymentCapture {
    /// Registered orders by order id
    orders: Mutex<HashMap<String, CaptureResult>>,
    /// Number of capture calls served
    captures: AtomicUsize,
    /// Whether to simulate a gateway failure on the next call
    fail_next: AtomicBool,
}

impl StubPaymentCapture {
    /// Create a stub with no registered orders.
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            captures: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Register an order that captures as COMPLETED.
    ///
    /// The order id doubles as the external payment id.
    pub fn register(&self, order_id: &str, gross_amount: Decimal, currency: Currency) {
        self.register_with_status(order_id, gross_amount, currency, CaptureStatus::Completed);
    }

    /// Register an order with an explicit capture status.
    pub fn register_with_status(
        &self,
        order_id: &str,
        gross_amount: Decimal,
        currency: Currency,
        status: CaptureStatus,
    ) {
        let result = CaptureResult {
            status,
            external_payment_id: order_id.to_string(),
            gross_amount,
            currency,
            payer: PayerIdentity {
                payer_id: Some(format!("PAYER-{}", order_id)),
                email: None,
                name: None,
            },
        };
        lock(&self.orders).insert(order_id.to_string(), result);
    }

    /// Configure the next capture to fail.
    pub fn set_fail_next(&self, fail: bool) {
        self.fail_next.store(fail, Ordering::SeqCst);
    }

    /// Number of capture calls served
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl Default for StubPaymentCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentCapturePort for StubPaymentCapture {
    async fn capture(&self, order_id: &str) -> Result<CaptureResult, LedgerError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::PaymentGateway("Simulated gateway failure".to_string()));
        }

        let result = lock(&self.orders)
            .get(order_id)
            .cloned()
            .ok_or_else(|| LedgerError::PaymentGateway(format!("Unknown order: {}", order_id)))?;

        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }

    fn gateway(&self) -> &str {
        "PAYPAL"
    }
}

// =============================================================================
// Memory Notification Sink
// =============================================================================

/// Notification sink that records deliveries in memory.
///
/// Repeated deliveries of the same notification id are accepted and ignored.
pub struct MemoryNotificationSink {
    delivered: Mutex<Vec<Notification>>,
    /// Number of upcoming deliveries to fail
    failures: AtomicUsize,
}

impl MemoryNotificationSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` deliveries.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Notifications delivered so far, in delivery order
    pub fn delivered(&self) -> Vec<Notification> {
        lock(&self.delivered).clone()
    }

    /// Number of distinct notifications delivered
    pub fn delivery_count(&self) -> usize {
        lock(&self.delivered).len()
    }

    /// Check whether a notification id was delivered
    pub fn was_delivered(&self, id: NotificationId) -> bool {
        lock(&self.delivered).iter().any(|n| n.id == id)
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryNotificationSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), LedgerError> {
        if self.take_failure() {
            return Err(LedgerError::NotificationDelivery(
                "Simulated sink failure".to_string(),
            ));
        }

        let mut delivered = lock(&self.delivered);
        if !delivered.iter().any(|n| n.id == notification.id) {
            delivered.push(notification.clone());
        }
        Ok(())
    }
}

// =============================================================================
// Log Notification Sink
// =============================================================================

/// Notification sink that writes each notification as a tracing event.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), LedgerError> {
        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            kind = notification.kind.as_str(),
            title = %notification.title,
            message = %notification.message,
            "Notification delivered"
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
