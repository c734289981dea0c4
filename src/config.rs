//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::CoordinatorConfig;
use crate::idempotency::IdempotencyPolicy;
use crate::jobs::MaintenanceConfig;

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Postgres,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            _ => Err(ConfigError::InvalidValue("LEDGER_BACKEND")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,

    /// Database connection URL (postgres backend only)
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Bounded wait for account locks
    pub lock_timeout: Duration,

    /// Retention window for idempotency records
    pub idempotency_ttl: Duration,

    /// In-flight idempotency claims older than this are abandoned
    pub idempotency_stale_after: Duration,

    /// Page size of lazy ledger scans
    pub page_size: usize,

    /// Period of the maintenance jobs
    pub maintenance_interval: Duration,

    /// Environment (development, production)
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend: Backend = lookup("LEDGER_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .parse()?;

        let database_url = lookup("DATABASE_URL");
        if backend == Backend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;
        let lock_timeout_ms: u64 = parse_or(&lookup, "LEDGER_LOCK_TIMEOUT_MS", 5000)?;
        let idempotency_ttl_secs: u64 = parse_or(&lookup, "LEDGER_IDEMPOTENCY_TTL_SECS", 86_400)?;
        let idempotency_stale_secs: u64 = parse_or(&lookup, "LEDGER_IDEMPOTENCY_STALE_SECS", 300)?;
        let page_size: usize = parse_or(&lookup, "LEDGER_PAGE_SIZE", 500)?;
        let maintenance_secs: u64 = parse_or(&lookup, "LEDGER_MAINTENANCE_INTERVAL_SECS", 60)?;

        if page_size == 0 {
            return Err(ConfigError::InvalidValue("LEDGER_PAGE_SIZE"));
        }
        if maintenance_secs == 0 {
            return Err(ConfigError::InvalidValue("LEDGER_MAINTENANCE_INTERVAL_SECS"));
        }

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        Ok(Self {
            backend,
            database_url,
            database_max_connections,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            idempotency_ttl: Duration::from_secs(idempotency_ttl_secs),
            idempotency_stale_after: Duration::from_secs(idempotency_stale_secs),
            page_size,
            maintenance_interval: Duration::from_secs(maintenance_secs),
            environment,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            lock_timeout: self.lock_timeout,
            page_size: self.page_size,
        }
    }

    pub fn idempotency(&self) -> IdempotencyPolicy {
        IdempotencyPolicy {
            ttl: self.idempotency_ttl,
            stale_after: self.idempotency_stale_after,
        }
    }

    pub fn maintenance(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            maintenance_interval: self.maintenance_interval,
            ..MaintenanceConfig::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
