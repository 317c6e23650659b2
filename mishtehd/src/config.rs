//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use mishteh_engine::FeePolicy;
use mishteh_ledger::LedgerConfig;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Ledger writer tunables (fee policy, retries, claim lease)
    pub ledger: LedgerConfig,

    /// Outbox worker configuration
    pub notifications: NotificationConfig,

    /// PostgreSQL connection string; in-memory store when absent
    pub database_url: Option<String>,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Notification worker configuration.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Interval between outbox polls
    pub poll_interval_ms: u64,
    /// Pending notifications delivered per poll
    pub batch_size: usize,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let ledger = Self::load_ledger_config()?;
        let notifications = Self::load_notification_config()?;
        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        Ok(Self {
            api,
            ledger,
            notifications,
            database_url,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            ledger: LedgerConfig {
                claim_poll: Duration::from_millis(5),
                ..LedgerConfig::default()
            },
            notifications: NotificationConfig {
                poll_interval_ms: 50,
                batch_size: 10,
            },
            database_url: None,
            environment: Environment::Test,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("MISHTEH_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid MISHTEH_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("MISHTEH_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port_str = env::var("MISHTEH_API_PORT").unwrap_or_else(|_| "8080".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| DaemonError::Config(format!("Invalid MISHTEH_API_PORT: {}", port_str)))?;

        Ok(ApiConfig { host, port })
    }

    fn load_ledger_config() -> DaemonResult<LedgerConfig> {
        let defaults = LedgerConfig::default();

        let fixed_fee = Self::load_decimal_env("MISHTEH_FEE_FIXED", defaults.fee_policy.fixed_fee())?;
        let rate = Self::load_decimal_env("MISHTEH_FEE_RATE", defaults.fee_policy.rate())?;
        let fee_policy = FeePolicy::new(fixed_fee, rate)
            .map_err(|e| DaemonError::Config(format!("Invalid fee policy: {}", e)))?;

        let max_conflict_retries = Self::load_parsed_env(
            "MISHTEH_MAX_CONFLICT_RETRIES",
            defaults.max_conflict_retries,
        )?;
        let claim_poll_ms = Self::load_parsed_env("MISHTEH_CLAIM_POLL_MS", 25u64)?;
        let claim_lease_secs = Self::load_parsed_env("MISHTEH_CLAIM_LEASE_SECS", 30u64)?;
        let suppress_anonymous_notifications =
            Self::load_bool_env("MISHTEH_SUPPRESS_ANONYMOUS_NOTIFICATIONS", false)?;

        if claim_lease_secs == 0 {
            return Err(DaemonError::Config(
                "MISHTEH_CLAIM_LEASE_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(LedgerConfig {
            fee_policy,
            max_conflict_retries,
            suppress_anonymous_notifications,
            claim_poll: Duration::from_millis(claim_poll_ms),
            claim_lease: Duration::from_secs(claim_lease_secs),
        })
    }

    fn load_notification_config() -> DaemonResult<NotificationConfig> {
        let poll_interval_ms = Self::load_parsed_env("MISHTEH_NOTIFY_POLL_MS", 1000u64)?;
        let batch_size = Self::load_parsed_env("MISHTEH_NOTIFY_BATCH", 100usize)?;

        if poll_interval_ms == 0 || batch_size == 0 {
            return Err(DaemonError::Config(
                "MISHTEH_NOTIFY_POLL_MS and MISHTEH_NOTIFY_BATCH must be greater than zero"
                    .to_string(),
            ));
        }

        Ok(NotificationConfig {
            poll_interval_ms,
            batch_size,
        })
    }

    fn load_decimal_env(key: &str, default: Decimal) -> DaemonResult<Decimal> {
        match env::var(key) {
            Ok(val) => Decimal::from_str(&val)
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }

    fn load_parsed_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
        match env::var(key) {
            Ok(val) => val
                .parse::<T>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }

    fn load_bool_env(key: &str, default: bool) -> DaemonResult<bool> {
        match env::var(key) {
            Ok(val) => match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            },
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            ledger: LedgerConfig::default(),
            notifications: NotificationConfig {
                poll_interval_ms: 1000,
                batch_size: 100,
            },
            database_url: None,
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
