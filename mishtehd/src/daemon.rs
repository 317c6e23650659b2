//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Ledger Writer (donation recording, shared by every handler)
//! - API Server (HTTP endpoints)
//! - Notification Worker (outbox retries)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Report the pending outbox left by the previous run
//! 4. Start API server and notification worker
//! 5. Wait for Ctrl-C
//! 6. Cancel the worker and shut down

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mishteh_ledger::{
    LedgerWriter, LogNotificationSink, NotificationSink, PaymentCapturePort, StubPaymentCapture,
};
use mishteh_store::{MemoryStore, Store};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::notification_worker::NotificationWorker;

// =============================================================================
// Daemon
// =============================================================================

/// The main Mishteh daemon.
pub struct Daemon<S: Store + 'static, N: NotificationSink + 'static, P: PaymentCapturePort + 'static> {
    /// Configuration
    config: Config,
    /// Single write path into the ledger
    writer: Arc<LedgerWriter<S, N>>,
    /// Payment gateway
    capture: Arc<P>,
    /// Store
    store: Arc<S>,
}

impl Daemon<MemoryStore, LogNotificationSink, StubPaymentCapture> {
    /// Create a new daemon with stub components (for testing/development).
    ///
    /// The stub capture has no registered orders, so every capture through
    /// this daemon's API is rejected as a gateway failure.
    pub fn new_stub(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(LogNotificationSink),
            Arc::new(StubPaymentCapture::new()),
        )
    }
}

impl<S, N, P> Daemon<S, N, P>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    /// Create a new daemon with provided components.
    pub fn new(config: Config, store: Arc<S>, sink: Arc<N>, capture: Arc<P>) -> Self {
        let writer = Arc::new(LedgerWriter::new(Arc::clone(&store), sink, config.ledger.clone()));

        Self {
            config,
            writer,
            capture,
            store,
        }
    }

    /// Ledger writer shared with the API.
    pub fn writer(&self) -> &Arc<LedgerWriter<S, N>> {
        &self.writer
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            gateway = self.capture.gateway(),
            "Starting Mishteh daemon"
        );

        // 1. Report outbox backlog
        self.report_pending_outbox().await?;

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Start notification worker
        let shutdown = CancellationToken::new();
        let worker = NotificationWorker::new(Arc::clone(&self.writer), self.config.notifications.clone());
        let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

        // 4. Wait for shutdown signal
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");

        // 5. Graceful shutdown
        shutdown.cancel();
        worker_handle
            .await
            .map_err(|e| DaemonError::Task(format!("Notification worker panicked: {}", e)))??;

        self.shutdown().await
    }

    /// Log notifications left pending by a previous run.
    async fn report_pending_outbox(&self) -> DaemonResult<usize> {
        let pending = self
            .store
            .notifications()
            .find_pending(self.config.notifications.batch_size)
            .await?;

        if pending.is_empty() {
            info!("Notification outbox is empty");
        } else {
            info!(count = pending.len(), "Pending notifications in outbox (worker will deliver)");
        }

        Ok(pending.len())
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            writer: Arc::clone(&self.writer),
            capture: Arc::clone(&self.capture),
        });

        let router = create_router(state).layer(tower_http::trace::TraceLayer::new_for_http());
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            DaemonError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;

        let local_addr = listener.local_addr().map_err(|e| {
            DaemonError::Config(format!("Failed to get local address: {}", e))
        })?;

        // Spawn the server task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    /// Graceful shutdown.
    async fn shutdown(&self) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");

        // Final outbox pass so delivered state is recorded before exit
        let stats = self.writer.relay().relay_pending(self.config.notifications.batch_size).await?;
        info!(delivered = stats.delivered, failed = stats.failed, "Shutdown complete");

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let config = Config::test();
        let daemon = Daemon::new_stub(config);

        assert_eq!(daemon.store.request_count(), 0);
        assert_eq!(daemon.writer().config().max_conflict_retries, 16);
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let config = Config::test();
        let daemon = Daemon::new_stub(config);

        let addr = daemon.start_api_server().await.unwrap();

        // Server should be running on a port
        assert!(addr.port() > 0);

        let stream = tokio::net::TcpStream::connect(addr).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_daemon_empty_outbox() {
        let config = Config::test();
        let daemon = Daemon::new_stub(config);

        let pending = daemon.report_pending_outbox().await.unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn test_stub_daemon_rejects_every_capture() {
        use axum::body::Body;
        use axum::http::{Request as HttpRequest, StatusCode};
        use mishteh_domain::{Currency, Request};
        use mishteh_store::RequestRepository;
        use tower::ServiceExt;
        use uuid::Uuid;

        let daemon = Daemon::new_stub(Config::test());
        let mut request = Request::new(Uuid::now_v7(), "School Shoes", Currency::Zar, None).unwrap();
        request.approve().unwrap();
        daemon.store.save(&request).await.unwrap();

        let router = create_router(Arc::new(ApiState {
            writer: Arc::clone(&daemon.writer),
            capture: Arc::clone(&daemon.capture),
        }));
        let body = serde_json::json!({
            "order_id": "ORDER-1",
            "request_id": request.id,
            "donor_id": Uuid::now_v7(),
        });
        let response = router
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/payments/capture")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(daemon.store.donation_count(), 0);
    }
}
