//! Mishteh Daemon
//!
//! Runtime orchestrator for payment capture, the donation ledger, and the
//! notification outbox.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration (in-memory store)
//! cargo run -p mishtehd
//!
//! # Start against PostgreSQL
//! DATABASE_URL=postgres://localhost/mishteh cargo run -p mishtehd --features postgres
//!
//! # Database maintenance
//! cargo run -p mishtehd --features postgres -- db migrate
//! ```
//!
//! # Environment Variables
//!
//! - `MISHTEH_ENV`: Environment (test, development, production)
//! - `MISHTEH_API_HOST`: API host (default: 0.0.0.0)
//! - `MISHTEH_API_PORT`: API port (default: 8080)
//! - `MISHTEH_FEE_FIXED`: Fixed fee per donation (default: 2.00)
//! - `MISHTEH_FEE_RATE`: Proportional fee (default: 0.03)
//! - `MISHTEH_MAX_CONFLICT_RETRIES`: CAS retries per donation (default: 16)
//! - `MISHTEH_CLAIM_POLL_MS` / `MISHTEH_CLAIM_LEASE_SECS`: Idempotency claim timing
//! - `MISHTEH_SUPPRESS_ANONYMOUS_NOTIFICATIONS`: Skip notifications for anonymous gifts
//! - `MISHTEH_NOTIFY_POLL_MS` / `MISHTEH_NOTIFY_BATCH`: Outbox worker timing
//! - `MISHTEH_LOG_JSON`: Emit JSON logs (default: false)
//! - `DATABASE_URL`: PostgreSQL connection (requires the `postgres` feature)
//!
//! No gateway adapter ships with the binary: payment capture is served by an
//! empty stub, so `POST /payments/capture` returns 502 until one is wired in
//! through `Daemon::new`.

use mishtehd::{Config, Daemon};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading the log format
    let _ = dotenvy::dotenv();

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("mishtehd=info".parse()?);
    let json_logs = std::env::var("MISHTEH_LOG_JSON")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1"))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry().with(fmt::layer().json()).with(filter).init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("db") {
        #[cfg(feature = "postgres")]
        {
            return mishtehd::db::run_db_command(args).await;
        }
        #[cfg(not(feature = "postgres"))]
        {
            anyhow::bail!("db commands require the `postgres` feature");
        }
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        "Mishteh Daemon"
    );
    warn!("No payment gateway adapter configured; POST /payments/capture will answer 502 for every order");

    match config.database_url.clone() {
        #[cfg(feature = "postgres")]
        Some(url) => {
            use mishteh_ledger::{LogNotificationSink, StubPaymentCapture};
            use mishteh_store::PgStore;
            use std::sync::Arc;

            let pool = sqlx::PgPool::connect(&url).await?;
            info!("Connected to PostgreSQL");

            let daemon = Daemon::new(
                config,
                Arc::new(PgStore::new(Arc::new(pool))),
                Arc::new(LogNotificationSink),
                Arc::new(StubPaymentCapture::new()),
            );
            daemon.run().await?;
        },
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            warn!("DATABASE_URL is set but the postgres feature is disabled; using in-memory store");
            Daemon::new_stub(config).run().await?;
        },
        None => {
            Daemon::new_stub(config).run().await?;
        },
    }

    Ok(())
}
