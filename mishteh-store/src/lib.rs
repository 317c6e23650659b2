//! Mishteh Storage Layer
//!
//! Provides persistence for requests, donations, ledger lines, the
//! notification outbox and idempotency keys.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **In-memory store**: Fast implementation for testing
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! Every write of a captured payment goes through [`Store::commit_donation`],
//! which applies the request compare-and-swap and all inserts atomically.
//!
//! # Usage
//!
//! ```rust
//! use mishteh_store::{MemoryStore, RequestRepository};
//! use mishteh_domain::{Currency, Request};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     let request = Request::new(Uuid::now_v7(), "School Fees", Currency::Zar, None).unwrap();
//!     store.save(&request).await.unwrap();
//!
//!     let found = store.find_by_id(request.id).await.unwrap();
//!     assert!(found.is_some());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{
    ClaimOutcome, DonationCommit, DonationRepository, IdempotencyRecord, IdempotencyRepository,
    NotificationRepository, RequestRepository, Store, TransactionRepository,
};
