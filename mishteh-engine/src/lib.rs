//! Mishteh Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes a request's funding state and a contribution → returns the new
//! state and the fee split to record.

#![warn(clippy::all)]

pub mod error;
pub mod fee;
pub mod funding;

pub use error::{EngineError, EngineResult};
pub use fee::{FeeBreakdown, FeePolicy};
pub use funding::{apply_contribution, decide, FundingDecision};
