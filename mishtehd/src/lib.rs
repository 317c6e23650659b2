//! Mishteh Daemon Library
//!
//! Runtime orchestrator for the donation ledger.
//!
//! # Architecture
//!
//! ```text
//! HTTP → API Server → PaymentCapturePort (gateway capture)
//!                   → LedgerWriter → Store (atomic commit + outbox)
//!                                       ↑
//!                             Notification Worker → NotificationSink
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **API**: HTTP endpoints for capture and ledger queries
//! - **Notification Worker**: Delivers pending outbox notifications
//! - **Config**: Environment-based configuration
//!
//! # Payment capture
//!
//! The binary wires [`mishteh_ledger::StubPaymentCapture`] with no registered
//! orders, whichever store it runs on. Until a real gateway adapter
//! implementing `PaymentCapturePort` is passed to [`Daemon::new`],
//! `POST /payments/capture` answers 502 for every order id. Request creation
//! and the ledger queries work as usual.
//!
//! # Example
//!
//! ```rust,ignore
//! use mishtehd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod notification_worker;

#[cfg(feature = "postgres")]
pub mod db;

// Re-exports for convenience
pub use api::{create_router, ApiState};
pub use config::{ApiConfig, Config, Environment, NotificationConfig};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use notification_worker::NotificationWorker;
