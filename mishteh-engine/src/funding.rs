//! Funding state machine.
//!
//! One pure, total function decides how a contribution changes a request:
//!
//! ```text
//! WITHDRAWN | REJECTED              → rejected (RequestNotAcceptingFunds)
//! otherwise, total' = total + a
//!   no target                       → status unchanged
//!   target set, total' >= target    → FUNDED
//!   target set, total' <  target    → PARTIALLY_FUNDED
//! ```
//!
//! FUNDED requests keep accepting contributions (over-funding); the total
//! keeps growing and the status stays FUNDED. The gross contribution is
//! credited, not the net after fees.

use mishteh_domain::{Money, Request, RequestStatus};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Outcome of applying one contribution to a request's funding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingDecision {
    pub previous_status: RequestStatus,
    pub new_status: RequestStatus,
    pub previous_amount: Money,
    pub new_amount: Money,
}

impl FundingDecision {
    /// True if this contribution moved the request into FUNDED
    pub fn reached_target(&self) -> bool {
        self.new_status == RequestStatus::Funded && self.previous_status != RequestStatus::Funded
    }

    /// True if the request was already FUNDED before this contribution
    pub fn is_over_funding(&self) -> bool {
        self.previous_status == RequestStatus::Funded
    }
}

/// Decide the new funding state for a contribution.
///
/// # Errors
/// - `RequestNotAcceptingFunds` for WITHDRAWN / REJECTED requests
/// - `InvalidAmount` if the contribution is zero
/// - `CurrencyMismatch` if the contribution, total and target disagree on currency
pub fn apply_contribution(
    status: RequestStatus,
    current: &Money,
    target: Option<&Money>,
    contribution: &Money,
) -> EngineResult<FundingDecision> {
    if status.is_terminal() {
        return Err(EngineError::RequestNotAcceptingFunds { status });
    }

    if !contribution.is_positive() {
        return Err(EngineError::InvalidAmount(format!(
            "Contribution must be positive, got {}",
            contribution
        )));
    }

    let new_amount = current.checked_add(contribution)?;

    let new_status = match target {
        None => status,
        Some(target) => {
            target.ensure_same_currency(&new_amount)?;
            if new_amount.amount() >= target.amount() {
                RequestStatus::Funded
            } else {
                RequestStatus::PartiallyFunded
            }
        },
    };

    Ok(FundingDecision {
        previous_status: status,
        new_status,
        previous_amount: *current,
        new_amount,
    })
}

/// Convenience wrapper deciding directly from a loaded request.
pub fn decide(request: &Request, contribution: &Money) -> EngineResult<FundingDecision> {
    apply_contribution(
        request.status,
        &request.current_amount,
        request.target_amount.as_ref(),
        contribution,
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mishteh_domain::Currency;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn zar(value: Decimal) -> Money {
        Money::new(value, Currency::Zar).unwrap()
    }

    #[test]
    fn test_partial_then_funded_then_over_funded() {
        let target = zar(dec!(1000));

        let first =
            apply_contribution(RequestStatus::Active, &zar(dec!(0)), Some(&target), &zar(dec!(400)))
                .unwrap();
        assert_eq!(first.new_amount.amount(), dec!(400));
        assert_eq!(first.new_status, RequestStatus::PartiallyFunded);
        assert!(!first.reached_target());

        let second = apply_contribution(
            first.new_status,
            &first.new_amount,
            Some(&target),
            &zar(dec!(600)),
        )
        .unwrap();
        assert_eq!(second.new_amount.amount(), dec!(1000));
        assert_eq!(second.new_status, RequestStatus::Funded);
        assert!(second.reached_target());

        let third = apply_contribution(
            second.new_status,
            &second.new_amount,
            Some(&target),
            &zar(dec!(50)),
        )
        .unwrap();
        assert_eq!(third.new_amount.amount(), dec!(1050));
        assert_eq!(third.new_status, RequestStatus::Funded);
        assert!(third.is_over_funding());
        assert!(!third.reached_target());
    }

    #[test]
    fn test_no_target_keeps_status() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Active,
            RequestStatus::PartiallyFunded,
        ] {
            let decision =
                apply_contribution(status, &zar(dec!(10)), None, &zar(dec!(5000))).unwrap();
            assert_eq!(decision.new_status, status);
            assert_eq!(decision.new_amount.amount(), dec!(5010));
        }
    }

    #[test]
    fn test_terminal_statuses_reject() {
        for status in [RequestStatus::Withdrawn, RequestStatus::Rejected] {
            let result = apply_contribution(status, &zar(dec!(0)), None, &zar(dec!(10)));
            assert_eq!(result, Err(EngineError::RequestNotAcceptingFunds { status }));
        }
    }

    #[test]
    fn test_pending_request_accepts_funds() {
        let decision = apply_contribution(
            RequestStatus::Pending,
            &zar(dec!(0)),
            Some(&zar(dec!(100))),
            &zar(dec!(100)),
        )
        .unwrap();
        assert_eq!(decision.new_status, RequestStatus::Funded);
    }

    #[test]
    fn test_exactly_reaching_target_is_funded() {
        let decision = apply_contribution(
            RequestStatus::PartiallyFunded,
            &zar(dec!(999.99)),
            Some(&zar(dec!(1000))),
            &zar(dec!(0.01)),
        )
        .unwrap();
        assert_eq!(decision.new_status, RequestStatus::Funded);
    }

    #[test]
    fn test_zero_contribution_rejected() {
        let result =
            apply_contribution(RequestStatus::Active, &zar(dec!(0)), None, &Money::zero(Currency::Zar));
        assert!(matches!(result, Err(EngineError::InvalidAmount(_))));
    }

    #[test]
    fn test_currency_mismatch_rejected() {
        let usd = Money::new(dec!(10), Currency::Usd).unwrap();
        let result = apply_contribution(RequestStatus::Active, &zar(dec!(0)), None, &usd);
        assert_eq!(
            result,
            Err(EngineError::CurrencyMismatch {
                expected: Currency::Zar,
                actual: Currency::Usd
            })
        );
    }

    #[test]
    fn test_decide_from_request() {
        let mut request =
            Request::new(Uuid::now_v7(), "Food and Groceries", Currency::Zar, Some(zar(dec!(2000))))
                .unwrap();
        request.approve().unwrap();

        let decision = decide(&request, &zar(dec!(500))).unwrap();
        assert_eq!(decision.previous_status, RequestStatus::Active);
        assert_eq!(decision.new_status, RequestStatus::PartiallyFunded);
    }

    #[test]
    fn test_order_of_contributions_does_not_change_total() {
        let amounts = [dec!(12.34), dec!(100), dec!(0.01), dec!(999.99), dec!(5)];
        let target = zar(dec!(1000));

        let fold = |order: &[Decimal]| {
            let mut status = RequestStatus::Active;
            let mut total = zar(dec!(0));
            for a in order {
                let d = apply_contribution(status, &total, Some(&target), &zar(*a)).unwrap();
                status = d.new_status;
                total = d.new_amount;
            }
            (status, total)
        };

        let forward = fold(&amounts);
        let mut reversed = amounts;
        reversed.reverse();
        let backward = fold(&reversed);

        assert_eq!(forward, backward);
        assert_eq!(forward.1.amount(), dec!(1117.34));
        assert_eq!(forward.0, RequestStatus::Funded);
    }
}
