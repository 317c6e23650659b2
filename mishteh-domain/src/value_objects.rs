//! Value Objects for the Mishteh ledger domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Amount is negative, zero where a positive amount is required, or otherwise unusable
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Currency code is not one the platform settles in
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    /// Arithmetic or comparison across two different currencies
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        /// Currency of the left-hand side (or of the request)
        expected: Currency,
        /// Currency that was supplied
        actual: Currency,
    },

    /// External payment identifier is empty or malformed
    #[error("Invalid payment id: {0}")]
    InvalidPaymentId(String),

    /// Status string could not be parsed or transition is not allowed
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// Currency
// =============================================================================

/// Currencies the platform accepts donations in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US Dollar
    Usd,
    /// South African Rand
    Zar,
    /// Euro
    Eur,
    /// British Pound
    Gbp,
}

impl Currency {
    /// ISO 4217 code (e.g., "ZAR")
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Zar => "ZAR",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    /// Display symbol (e.g., "R")
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Usd => "$",
            Currency::Zar => "R",
            Currency::Eur => "€",
            Currency::Gbp => "£",
        }
    }

    /// Number of decimal places of the smallest currency unit
    pub fn minor_unit_scale(&self) -> u32 {
        2
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "ZAR" => Ok(Currency::Zar),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            other => Err(DomainError::InvalidCurrency(format!("Unsupported currency: {}", other))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// =============================================================================
// Money
// =============================================================================

/// Money is a non-negative amount in a single currency.
///
/// The amount is always held at the currency's minor-unit scale (cents), so
/// every value is an exact integer number of smallest units and sums never
/// drift. Values with more precision are rounded half-up on construction.
///
/// # Invariants
/// - amount >= 0
/// - amount.scale() == currency.minor_unit_scale()
///
/// # Examples
/// ```
/// # use mishteh_domain::value_objects::{Currency, Money};
/// # use rust_decimal_macros::dec;
/// let m = Money::new(dec!(10.005), Currency::Zar).unwrap();
/// assert_eq!(m.amount(), dec!(10.01));
/// assert_eq!(m.to_string(), "10.01 ZAR");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyWire")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

/// Incoming shape of [`Money`]; always rebuilt through [`Money::new`].
#[derive(Deserialize)]
struct MoneyWire {
    amount: Decimal,
    currency: Currency,
}

impl TryFrom<MoneyWire> for Money {
    type Error = DomainError;

    fn try_from(wire: MoneyWire) -> Result<Self, Self::Error> {
        Money::new(wire.amount, wire.currency)
    }
}

impl Money {
    /// Create a Money value, rounding half-up to the smallest currency unit
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value < 0
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, DomainError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(DomainError::InvalidAmount(format!(
                "Amount must not be negative: {}",
                amount
            )));
        }
        Ok(Self {
            amount: Self::to_minor_scale(amount, currency),
            currency,
        })
    }

    /// Zero in the given currency
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Self::to_minor_scale(Decimal::ZERO, currency),
            currency,
        }
    }

    /// Create from an integer count of smallest units (cents)
    pub fn from_minor_units(units: u64, currency: Currency) -> Self {
        let amount = Decimal::from(units) / Decimal::from(10u64.pow(currency.minor_unit_scale()));
        Self {
            amount: Self::to_minor_scale(amount, currency),
            currency,
        }
    }

    /// Get the underlying Decimal value
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Get the currency
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Amount expressed in smallest currency units
    pub fn minor_units(&self) -> i128 {
        self.amount.mantissa()
    }

    /// True if the amount is exactly zero
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// True if the amount is strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Add two amounts of the same currency
    ///
    /// # Errors
    /// - `CurrencyMismatch` if currencies differ
    /// - `InvalidAmount` on overflow
    pub fn checked_add(&self, other: &Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(other)?;
        let sum = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| DomainError::InvalidAmount("Amount overflow".to_string()))?;
        Money::new(sum, self.currency)
    }

    /// Subtract `other` from `self`
    ///
    /// # Errors
    /// - `CurrencyMismatch` if currencies differ
    /// - `InvalidAmount` if the result would be negative
    pub fn checked_sub(&self, other: &Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(other)?;
        if other.amount > self.amount {
            return Err(DomainError::InvalidAmount(format!(
                "Cannot subtract {} from {}",
                other, self
            )));
        }
        Money::new(self.amount - other.amount, self.currency)
    }

    /// Subtract, clamping at zero instead of failing
    pub fn saturating_sub(&self, other: &Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(other)?;
        if other.amount >= self.amount {
            return Ok(Money::zero(self.currency));
        }
        Money::new(self.amount - other.amount, self.currency)
    }

    /// Fail with `CurrencyMismatch` unless both amounts share a currency
    pub fn ensure_same_currency(&self, other: &Money) -> Result<(), DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                expected: self.currency,
                actual: other.currency,
            });
        }
        Ok(())
    }

    fn to_minor_scale(amount: Decimal, currency: Currency) -> Decimal {
        let scale = currency.minor_unit_scale();
        let mut rounded = amount.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(scale);
        rounded
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.currency != other.currency {
            return None;
        }
        self.amount.partial_cmp(&other.amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

// =============================================================================
// ExternalPaymentId
// =============================================================================

/// Identifier of a captured payment at the gateway.
///
/// Doubles as the idempotency key of the ledger: one capture is applied at
/// most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalPaymentId(String);

impl TryFrom<String> for ExternalPaymentId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExternalPaymentId> for String {
    fn from(id: ExternalPaymentId) -> Self {
        id.0
    }
}

impl ExternalPaymentId {
    /// Suffix distinguishing the platform-fee ledger line
    pub const FEE_SUFFIX: &'static str = "-fee";

    /// Longest identifier accepted
    pub const MAX_LEN: usize = 128;

    /// Create a payment id with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPaymentId` if empty, too long, or
    /// already carrying the fee suffix.
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidPaymentId("Payment id must not be empty".to_string()));
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(DomainError::InvalidPaymentId(format!(
                "Payment id longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if trimmed.ends_with(Self::FEE_SUFFIX) {
            return Err(DomainError::InvalidPaymentId(format!(
                "Payment id must not end with {}",
                Self::FEE_SUFFIX
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identifier as given by the gateway
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Payment id recorded on the FEE ledger line
    pub fn fee_leg(&self) -> String {
        format!("{}{}", self.0, Self::FEE_SUFFIX)
    }
}

impl fmt::Display for ExternalPaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // Currency tests
    #[test]
    fn test_currency_parse() {
        assert_eq!("zar".parse::<Currency>().unwrap(), Currency::Zar);
        assert_eq!(" USD ".parse::<Currency>().unwrap(), Currency::Usd);
        assert!("BTC".parse::<Currency>().is_err());
    }

    #[test]
    fn test_currency_serde_uses_codes() {
        let json = serde_json::to_string(&Currency::Gbp).unwrap();
        assert_eq!(json, "\"GBP\"");
        let parsed: Currency = serde_json::from_str("\"EUR\"").unwrap();
        assert_eq!(parsed, Currency::Eur);
    }

    // Money tests
    #[test]
    fn test_money_validation() {
        assert!(Money::new(dec!(0), Currency::Zar).is_ok());
        assert!(Money::new(dec!(100.00), Currency::Zar).is_ok());
        assert!(Money::new(dec!(-0.01), Currency::Zar).is_err());
    }

    #[test]
    fn test_money_rounds_half_up_to_cents() {
        assert_eq!(Money::new(dec!(1.005), Currency::Usd).unwrap().amount(), dec!(1.01));
        assert_eq!(Money::new(dec!(1.004), Currency::Usd).unwrap().amount(), dec!(1.00));
        assert_eq!(Money::new(dec!(2.675), Currency::Usd).unwrap().amount(), dec!(2.68));
    }

    #[test]
    fn test_money_keeps_minor_unit_scale() {
        let m = Money::new(dec!(100), Currency::Zar).unwrap();
        assert_eq!(m.amount().scale(), 2);
        assert_eq!(m.minor_units(), 10000);
        assert_eq!(m.to_string(), "100.00 ZAR");
    }

    #[test]
    fn test_money_from_minor_units() {
        let m = Money::from_minor_units(12345, Currency::Eur);
        assert_eq!(m.amount(), dec!(123.45));
    }

    #[test]
    fn test_money_add_and_sub() {
        let a = Money::new(dec!(400), Currency::Zar).unwrap();
        let b = Money::new(dec!(600), Currency::Zar).unwrap();

        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum.amount(), dec!(1000));

        let diff = sum.checked_sub(&a).unwrap();
        assert_eq!(diff.amount(), dec!(600));

        assert!(a.checked_sub(&b).is_err());
        assert!(a.saturating_sub(&b).unwrap().is_zero());
    }

    #[test]
    fn test_money_currency_mismatch() {
        let zar = Money::new(dec!(10), Currency::Zar).unwrap();
        let usd = Money::new(dec!(10), Currency::Usd).unwrap();

        let err = zar.checked_add(&usd).unwrap_err();
        assert_eq!(
            err,
            DomainError::CurrencyMismatch {
                expected: Currency::Zar,
                actual: Currency::Usd
            }
        );
        assert!(zar.partial_cmp(&usd).is_none());
    }

    // ExternalPaymentId tests
    #[test]
    fn test_payment_id_validation() {
        assert!(ExternalPaymentId::new("5O190127TN364715T").is_ok());
        assert!(ExternalPaymentId::new("   ").is_err());
        assert!(ExternalPaymentId::new("ORDER-1-fee").is_err());
        assert!(ExternalPaymentId::new("x".repeat(129)).is_err());
    }

    #[test]
    fn test_payment_id_fee_leg() {
        let id = ExternalPaymentId::new("ORDER-1").unwrap();
        assert_eq!(id.fee_leg(), "ORDER-1-fee");
        assert_eq!(id.as_str(), "ORDER-1");
    }

    #[test]
    fn test_money_deserialize_validates() {
        let parsed: Money =
            serde_json::from_str(r#"{"amount":"10.005","currency":"ZAR"}"#).unwrap();
        assert_eq!(parsed.amount(), dec!(10.01));
        assert_eq!(parsed.amount().scale(), 2);

        let negative = serde_json::from_str::<Money>(r#"{"amount":"-5.00","currency":"ZAR"}"#);
        assert!(negative.is_err());

        let unknown = serde_json::from_str::<Money>(r#"{"amount":"5.00","currency":"BTC"}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_payment_id_deserialize_validates() {
        let parsed: ExternalPaymentId = serde_json::from_str(r#""ORDER-1""#).unwrap();
        assert_eq!(parsed.as_str(), "ORDER-1");
        assert_eq!(serde_json::to_string(&parsed).unwrap(), r#""ORDER-1""#);

        assert!(serde_json::from_str::<ExternalPaymentId>(r#""ORDER-1-fee""#).is_err());
        assert!(serde_json::from_str::<ExternalPaymentId>(r#""  ""#).is_err());
    }
}
