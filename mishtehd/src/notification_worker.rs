//! Notification worker: polls the outbox and delivers pending notifications.
//!
//! Donations enqueue their notification in the same commit as the ledger
//! lines; this worker retries whatever the inline delivery could not hand
//! to the sink.

use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mishteh_ledger::{LedgerWriter, NotificationSink, RelayStats};
use mishteh_store::Store;

use crate::config::NotificationConfig;
use crate::error::DaemonResult;

/// Outbox relay loop.
pub struct NotificationWorker<S: Store + 'static, N: NotificationSink + 'static> {
    writer: Arc<LedgerWriter<S, N>>,
    config: NotificationConfig,
}

impl<S: Store + 'static, N: NotificationSink + 'static> NotificationWorker<S, N> {
    /// Create a new notification worker.
    pub fn new(writer: Arc<LedgerWriter<S, N>>, config: NotificationConfig) -> Self {
        Self { writer, config }
    }

    /// Run the worker loop.
    ///
    /// Returns when shutdown is signaled via cancellation token.
    pub async fn run(self, shutdown: CancellationToken) -> DaemonResult<()> {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Notification worker started"
        );

        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Notification worker shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(stats) if stats.delivered > 0 || stats.failed > 0 => {
                            debug!(delivered = stats.delivered, failed = stats.failed, "Outbox pass");
                        }
                        Err(e) => {
                            error!(error = %e, "Outbox pass failed (will retry)");
                        }
                        _ => {}
                    }
                }
            }
        }

        info!("Notification worker stopped");
        Ok(())
    }

    /// Deliver one batch of pending notifications.
    pub async fn run_once(&self) -> DaemonResult<RelayStats> {
        let stats = self.writer.relay().relay_pending(self.config.batch_size).await?;

        if stats.failed > 0 {
            warn!(failed = stats.failed, "Some notifications remain pending");
        }

        Ok(stats)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mishteh_domain::{Currency, Money, Request};
    use mishteh_ledger::{LedgerConfig, MemoryNotificationSink, RecordDonation};
    use mishteh_store::{MemoryStore, NotificationRepository, RequestRepository};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        sink: Arc<MemoryNotificationSink>,
        writer: Arc<LedgerWriter<MemoryStore, MemoryNotificationSink>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(MemoryNotificationSink::new());
        let writer = Arc::new(LedgerWriter::new(
            Arc::clone(&store),
            Arc::clone(&sink),
            LedgerConfig::default(),
        ));
        Fixture { store, sink, writer }
    }

    fn config() -> NotificationConfig {
        NotificationConfig {
            poll_interval_ms: 10,
            batch_size: 10,
        }
    }

    async fn donate_with_failed_delivery(f: &Fixture, order_id: &str) {
        let mut request = Request::new(Uuid::now_v7(), "Food Parcels", Currency::Zar, None).unwrap();
        request.approve().unwrap();
        f.store.save(&request).await.unwrap();

        f.sink.fail_next(1);
        f.writer
            .record_completed_donation(RecordDonation {
                request_id: request.id,
                donor_id: Uuid::now_v7(),
                donor_name: "Fatima Hassan".to_string(),
                gross_amount: Money::new(dec!(40), Currency::Zar).unwrap(),
                message: None,
                anonymous: false,
                external_payment_id: order_id.to_string(),
                payer_id: None,
                payment_gateway: "PAYPAL".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_once_delivers_pending() {
        let f = fixture();
        donate_with_failed_delivery(&f, "ORDER-1").await;
        assert_eq!(f.store.find_pending(10).await.unwrap().len(), 1);

        let worker = NotificationWorker::new(Arc::clone(&f.writer), config());
        let stats = worker.run_once().await.unwrap();

        assert_eq!(stats.delivered, 1);
        assert_eq!(f.sink.delivery_count(), 1);
        assert!(f.store.find_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let f = fixture();
        donate_with_failed_delivery(&f, "ORDER-1").await;

        let worker = NotificationWorker::new(Arc::clone(&f.writer), config());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        // Give the loop a few ticks
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        handle.await.unwrap().unwrap();
        assert_eq!(f.sink.delivery_count(), 1);
    }
}
