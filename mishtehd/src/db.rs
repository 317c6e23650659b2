//! Database CLI subcommands for mishtehd.
//!
//! Provides `db migrate`, `db status`, and `db seed` commands.

use anyhow::{anyhow, Result};
use std::env;
use tracing::info;
use uuid::Uuid;

use mishteh_db::{migrate, seed_demo_requests, status};

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `mishtehd db migrate` - Run pending migrations
/// - `mishtehd db status` - Check migration status
/// - `mishtehd db seed [--owner-id UUID]...` - Seed demo funding requests
pub async fn run_db_command(args: Vec<String>) -> Result<()> {
    if args.len() < 3 {
        return Err(anyhow!("Usage: mishtehd db <migrate|status|seed> [options]"));
    }

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow!("DATABASE_URL environment variable is required for db commands"))?;

    let pool = sqlx::PgPool::connect(&database_url).await?;

    match args[2].as_str() {
        "migrate" => {
            migrate(&pool).await?;
        },
        "status" => {
            status(&pool).await?;
        },
        "seed" => {
            let owner_ids = parse_owner_ids(&args[3..])?;
            let inserted = seed_demo_requests(&pool, &owner_ids).await?;
            info!("Seeded {} demo requests across {} owners", inserted, owner_ids.len());
        },
        _ => {
            return Err(anyhow!("Unknown db command: {}. Use migrate, status, or seed", args[2]));
        },
    }

    Ok(())
}

/// Parse repeated `--owner-id UUID` options; one fresh owner when none given.
fn parse_owner_ids(args: &[String]) -> Result<Vec<Uuid>> {
    let mut owner_ids = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--owner-id" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--owner-id requires a value"))?;
                owner_ids.push(value.parse()?);
                i += 2;
            },
            other => {
                return Err(anyhow!("Unknown option: {}", other));
            },
        }
    }

    if owner_ids.is_empty() {
        owner_ids.push(Uuid::now_v7());
    }

    Ok(owner_ids)
}
