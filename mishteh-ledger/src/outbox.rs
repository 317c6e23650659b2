//! Notification outbox relay.
//!
//! Notifications are committed as PENDING together with the donation. The
//! relay hands them to the sink and marks them delivered; a failed delivery
//! leaves the entry pending for the next pass.

use std::sync::Arc;
use tracing::{debug, warn};

use mishteh_domain::Notification;
use mishteh_store::Store;

use crate::error::Result;
use crate::ports::NotificationSink;

/// Counts from one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: usize,
    pub failed: usize,
}

/// Moves pending outbox entries to the notification sink.
pub struct OutboxRelay<S: Store, N: NotificationSink> {
    store: Arc<S>,
    sink: Arc<N>,
}

impl<S: Store, N: NotificationSink> OutboxRelay<S, N> {
    /// Create a relay.
    pub fn new(store: Arc<S>, sink: Arc<N>) -> Self {
        Self { store, sink }
    }

    /// Deliver one notification and mark it delivered.
    ///
    /// Returns `false` if the sink failed; the failure is logged and counted
    /// on the outbox entry, never propagated.
    pub async fn deliver(&self, notification: &Notification) -> bool {
        match self.sink.deliver(notification).await {
            Ok(()) => {
                if let Err(e) = self.store.notifications().mark_delivered(notification.id).await {
                    // Delivered but not marked: the next pass re-delivers and
                    // the sink dedups on the id.
                    warn!(notification_id = %notification.id, error = %e, "Failed to mark notification delivered");
                }
                debug!(notification_id = %notification.id, "Notification delivered");
                true
            },
            Err(e) => {
                warn!(
                    notification_id = %notification.id,
                    user_id = %notification.user_id,
                    attempts = notification.attempts + 1,
                    error = %e,
                    "Notification delivery failed, left pending"
                );
                if let Err(e) = self.store.notifications().record_failed_attempt(notification.id).await {
                    warn!(notification_id = %notification.id, error = %e, "Failed to record delivery attempt");
                }
                false
            },
        }
    }

    /// Deliver up to `limit` pending notifications, oldest first.
    pub async fn relay_pending(&self, limit: usize) -> Result<RelayStats> {
        let pending = self.store.notifications().find_pending(limit).await?;
        let mut stats = RelayStats::default();

        for notification in &pending {
            if self.deliver(notification).await {
                stats.delivered += 1;
            } else {
                stats.failed += 1;
            }
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
    use crate::stub::MemoryNotificationSink;
    use mishteh_store::MemoryStore;

    #[tokio::test]
    async fn test_relay_empty_outbox() {
        let relay = OutboxRelay::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryNotificationSink::new()),
        );

        let stats = relay.relay_pending(100).await.unwrap();
        assert_eq!(stats, RelayStats::default());
    }
}
