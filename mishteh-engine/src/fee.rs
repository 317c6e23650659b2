//! Platform fee policy.
//!
//! ```text
//! fee = fixed_fee + gross × rate      (rounded half-up to the smallest unit)
//! net = gross − fee
//! ```
//!
//! The fixed fee is expressed in units of the donation's own currency.

use mishteh_domain::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Fee charged on every captured donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    fixed_fee: Decimal,
    rate: Decimal,
}

impl FeePolicy {
    /// Create a fee policy with validation
    ///
    /// # Errors
    /// Returns `EngineError::InvalidFeePolicy` if the fixed fee is negative
    /// or the rate is outside `[0, 1)`.
    pub fn new(fixed_fee: Decimal, rate: Decimal) -> EngineResult<Self> {
        if fixed_fee < Decimal::ZERO {
            return Err(EngineError::InvalidFeePolicy(
                "Fixed fee must not be negative".to_string(),
            ));
        }
        if rate < Decimal::ZERO || rate >= Decimal::ONE {
            return Err(EngineError::InvalidFeePolicy(format!(
                "Fee rate must be in [0, 1), got {}",
                rate
            )));
        }
        Ok(Self { fixed_fee, rate })
    }

    /// The platform's standard policy: 2.00 + 3%
    pub fn standard() -> Self {
        Self {
            fixed_fee: Decimal::new(200, 2),
            rate: Decimal::new(3, 2),
        }
    }

    /// Fixed part of the fee
    pub fn fixed_fee(&self) -> Decimal {
        self.fixed_fee
    }

    /// Proportional part of the fee (0.03 = 3%)
    pub fn rate(&self) -> Decimal {
        self.rate
    }

    /// Split a gross amount into fee and net.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidAmount` if `gross` is zero or if the fee
    /// would be greater than or equal to `gross` (net must stay positive).
    pub fn apply(&self, gross: &Money) -> EngineResult<FeeBreakdown> {
        if !gross.is_positive() {
            return Err(EngineError::InvalidAmount(format!(
                "Gross amount must be positive, got {}",
                gross
            )));
        }

        let raw_fee = self.fixed_fee + gross.amount() * self.rate;
        let fee = Money::new(raw_fee, gross.currency())?;

        if fee.amount() >= gross.amount() {
            return Err(EngineError::InvalidAmount(format!(
                "Fee {} would consume the gross amount {}",
                fee, gross
            )));
        }

        let net = gross.checked_sub(&fee)?;

        Ok(FeeBreakdown { gross: *gross, fee, net })
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Result of applying the fee policy to one gross amount.
///
/// `fee + net == gross` holds exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub gross: Money,
    pub fee: Money,
    pub net: Money,
}

// =============================================================================
// Tests
// =============================================================================
