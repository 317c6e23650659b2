//! Demo data for local development.
//!
//! Seeds a handful of PENDING funding requests so an operator can approve
//! them and run donations end to end.

use mishteh_domain::{Currency, Money, Request};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::Result;

/// A seeded request: title and target in ZAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoRequest {
    pub title: &'static str,
    pub target: Decimal,
}

/// The demo request catalogue.
pub fn demo_requests() -> Vec<DemoRequest> {
    [
        ("Medical Emergency - Surgery Needed", 25_000),
        ("School Fees for 3 Children", 8_500),
        ("Food and Groceries for Family", 2_000),
        ("Rent Payment - Facing Eviction", 12_000),
        ("Wheelchair for Disabled Son", 15_000),
        ("Business Startup - Small Bakery", 18_000),
        ("Funeral Expenses for Mother", 10_000),
        ("Laptop for Online Studies", 6_000),
        ("Diabetes Medication and Supplies", 3_500),
        ("Repair Damaged Home After Storm", 20_000),
    ]
    .into_iter()
    .map(|(title, target)| DemoRequest { title, target: Decimal::from(target) })
    .collect()
}

/// Insert the demo requests, spread round-robin over `owner_ids`.
///
/// Requests whose title already exists are skipped, so the seed can be
/// re-run. Returns the number of rows inserted.
pub async fn seed_demo_requests(pool: &PgPool, owner_ids: &[Uuid]) -> Result<usize> {
    if owner_ids.is_empty() {
        return Err(anyhow::anyhow!("At least one owner id is required to seed requests"));
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for (i, demo) in demo_requests().into_iter().enumerate() {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM requests WHERE title = $1 LIMIT 1")
            .bind(demo.title)
            .fetch_optional(&mut *tx)
            .await?;

        if exists.is_some() {
            continue;
        }

        let owner_id = owner_ids[i % owner_ids.len()];
        let target = Money::new(demo.target, Currency::Zar)?;
        let request = Request::new(owner_id, demo.title, Currency::Zar, Some(target))?;

        sqlx::query(
            r#"
            INSERT INTO requests (
                id, owner_id, title, currency,
                target_amount, current_amount, status, version,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(request.id)
        .bind(request.owner_id)
        .bind(&request.title)
        .bind(request.currency.code())
        .bind(demo.target)
        .bind(request.current_amount.amount())
        .bind(request.status.as_str())
        .bind(request.version)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await?;

        info!(request_id = %request.id, title = %request.title, target = %target, "Seeded demo request");
        inserted += 1;
    }

    tx.commit().await?;

    info!("Demo data initialized: {} new requests", inserted);
    Ok(inserted)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    #[test]
    fn test_demo_requests_unique_titles() {
        let demos = demo_requests();
        let titles: HashSet<_> = demos.iter().map(|d| d.title).collect();

        assert_eq!(demos.len(), 10);
        assert_eq!(titles.len(), demos.len());
    }

    #[test]
    fn test_demo_targets_are_valid_money() {
        for demo in demo_requests() {
            let money = Money::new(demo.target, Currency::Zar).unwrap();
            assert!(money.is_positive());
        }
        assert_eq!(demo_requests()[2].target, dec!(2000));
    }
}
