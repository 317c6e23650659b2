//! Database lifecycle management for Mishteh.
//!
//! Provides migration running, status checking, and demo data seeding.

mod init;

pub use init::{demo_requests, seed_demo_requests, DemoRequest};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Run all pending migrations.
///
/// Uses sqlx migrations from the workspace `migrations` directory.
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("../migrations").run(pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Check database connectivity and migration status.
///
/// Logs the applied migrations, newest first.
pub async fn status(pool: &PgPool) -> Result<()> {
    let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;

    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }

    info!("Database connectivity: OK");

    let rows = sqlx::query(
        r#"
        SELECT version, description, installed_on, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(migs) if !migs.is_empty() => {
            info!("Applied migrations:");
            for mig in migs {
                let version: i64 = mig.try_get("version")?;
                let description: String = mig.try_get("description")?;
                let installed_on: DateTime<Utc> = mig.try_get("installed_on")?;
                let success: bool = mig.try_get("success")?;

                let mark = if success { "ok" } else { "FAILED" };
                info!("  [{}] v{}: {} ({})", mark, version, description, installed_on);
            }
        },
        Ok(_) => {
            warn!("No migrations applied (run `mishtehd db migrate` first)");
        },
        Err(e) => {
            // Table is created by the first migrate run
            if e.to_string().contains("_sqlx_migrations") {
                warn!("Migration table not found (run `mishtehd db migrate` first)");
            } else {
                return Err(e.into());
            }
        },
    }

    Ok(())
}
