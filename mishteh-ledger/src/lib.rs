//! Mishteh Ledger Layer
//!
//! Records captured donation payments exactly once and keeps request
//! totals consistent under concurrency.
//!
//! # Architecture
//!
//! ```text
//! Capture → LedgerWriter → IdempotencyGuard → FundingDecision → Store::commit_donation
//!                                                                   │
//!                                               OutboxRelay → NotificationSink
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the payment gateway and notification delivery
//! - **Idempotency Guard**: At-most-once application per payment id
//! - **Ledger Writer**: The single write path (claim, decide, commit, notify)
//! - **Ledger Reader**: Read-only queries over requests, donations and ledger lines
//! - **Outbox Relay**: Retries pending notifications
//! - **Stub**: Test implementations for development
//!
//! # Example
//!
//! ```rust,ignore
//! use mishteh_ledger::{LedgerConfig, LedgerWriter, MemoryNotificationSink};
//! use mishteh_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let sink = Arc::new(MemoryNotificationSink::new());
//! let writer = LedgerWriter::new(store, sink, LedgerConfig::default());
//!
//! let result = writer.record_completed_donation(cmd).await?;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod guard;
pub mod outbox;
pub mod ports;
pub mod reader;
pub mod stub;
pub mod writer;

// Re-exports for convenience
pub use error::LedgerError;
pub use guard::{Claim, IdempotencyGuard};
pub use outbox::{OutboxRelay, RelayStats};
pub use ports::{CaptureResult, CaptureStatus, NotificationSink, PayerIdentity, PaymentCapturePort};
pub use reader::{LedgerReader, RequestTotals};
pub use stub::{LogNotificationSink, MemoryNotificationSink, StubPaymentCapture};
pub use writer::{LedgerConfig, LedgerResult, LedgerWriter, RecordDonation};
