//! Sync configuration
//!
//! Loaded from `CONTRACTS_*` / `DATABASE_*` environment variables (a `.env`
//! file is honoured), then optionally overridden by CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use contracts_common::env::parse_var_or;
use contracts_common::CommonError;
use serde::{Deserialize, Serialize};
use url::Url;

// ============================================================================
// Defaults
// ============================================================================

/// Public mirror of the contract snapshots.
pub const DEFAULT_BASE_URL: &str = "https://data.everef.net";

/// Path of the year-level history index below the base URL.
pub const DEFAULT_HISTORY_PATH: &str = "/public-contracts/history/";

pub const DEFAULT_CHECKPOINT_PATH: &str = "update_contracts.json";
pub const DEFAULT_LOCK_PATH: &str = "update_contracts.json.lock";

/// Rows per bulk insert.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Contracts issued within this many days are considered for deduplication.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// With no checkpoint on disk, start this many days before now.
pub const DEFAULT_CHECKPOINT_AGE_DAYS: i64 = 30;

/// Day listings this far before the checkpoint are still scanned.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 1;

/// Upper bound for every day-count setting (about a century).
pub const MAX_DAYS: i64 = 36_500;

/// Snapshots can be tens of megabytes; allow a slow mirror.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/contracts";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

fn default_user_agent() -> String {
    format!("contracts-ingest/{}", env!("CARGO_PKG_VERSION"))
}

/// Incremental sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub base_url: String,
    pub history_path: String,
    pub checkpoint_path: PathBuf,
    pub lock_path: PathBuf,
    pub batch_size: usize,
    pub retention_days: i64,
    pub default_checkpoint_age_days: i64,
    pub lookback_days: i64,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            history_path: DEFAULT_HISTORY_PATH.to_string(),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            retention_days: DEFAULT_RETENTION_DAYS,
            default_checkpoint_age_days: DEFAULT_CHECKPOINT_AGE_DAYS,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            user_agent: default_user_agent(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, CommonError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            base_url: parse_var_or("CONTRACTS_BASE_URL", defaults.base_url)?,
            history_path: parse_var_or("CONTRACTS_HISTORY_PATH", defaults.history_path)?,
            checkpoint_path: parse_var_or("CONTRACTS_CHECKPOINT_FILE", defaults.checkpoint_path)?,
            lock_path: parse_var_or("CONTRACTS_LOCK_FILE", defaults.lock_path)?,
            batch_size: parse_var_or("CONTRACTS_BATCH_SIZE", defaults.batch_size)?,
            retention_days: parse_var_or("CONTRACTS_RETENTION_DAYS", defaults.retention_days)?,
            default_checkpoint_age_days: parse_var_or(
                "CONTRACTS_DEFAULT_CHECKPOINT_AGE_DAYS",
                defaults.default_checkpoint_age_days,
            )?,
            lookback_days: parse_var_or("CONTRACTS_LOOKBACK_DAYS", defaults.lookback_days)?,
            http_timeout_secs: parse_var_or(
                "CONTRACTS_HTTP_TIMEOUT_SECS",
                defaults.http_timeout_secs,
            )?,
            max_retries: parse_var_or("CONTRACTS_MAX_RETRIES", defaults.max_retries)?,
            retry_delay_ms: parse_var_or("CONTRACTS_RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            user_agent: parse_var_or("CONTRACTS_USER_AGENT", defaults.user_agent)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CommonError> {
        self.base_url()?;
        if self.history_path.trim().is_empty() {
            return Err(CommonError::config("CONTRACTS_HISTORY_PATH must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(CommonError::config("CONTRACTS_BATCH_SIZE must be greater than 0"));
        }
        if self.retention_days <= 0 {
            return Err(CommonError::config("CONTRACTS_RETENTION_DAYS must be greater than 0"));
        }
        if self.default_checkpoint_age_days < 0 || self.lookback_days < 0 {
            return Err(CommonError::config(
                "CONTRACTS_DEFAULT_CHECKPOINT_AGE_DAYS and CONTRACTS_LOOKBACK_DAYS must not be negative",
            ));
        }
        for (name, days) in [
            ("CONTRACTS_RETENTION_DAYS", self.retention_days),
            ("CONTRACTS_DEFAULT_CHECKPOINT_AGE_DAYS", self.default_checkpoint_age_days),
            ("CONTRACTS_LOOKBACK_DAYS", self.lookback_days),
        ] {
            if days > MAX_DAYS {
                return Err(CommonError::config(format!(
                    "{} must be at most {}",
                    name, MAX_DAYS
                )));
            }
        }
        if self.http_timeout_secs == 0 {
            return Err(CommonError::config("CONTRACTS_HTTP_TIMEOUT_SECS must be greater than 0"));
        }
        Ok(())
    }

    /// Parsed base URL of the mirror
    pub fn base_url(&self) -> Result<Url, CommonError> {
        Url::parse(&self.base_url)
            .map_err(|e| CommonError::config(format!("invalid base url {:?}: {}", self.base_url, e)))
    }

    /// Full URL of the year-level history index
    pub fn history_url(&self) -> Result<Url, CommonError> {
        self.base_url()?.join(&self.history_path).map_err(|e| {
            CommonError::config(format!("invalid history path {:?}: {}", self.history_path, e))
        })
    }

    pub fn retention(&self) -> TimeDelta {
        TimeDelta::days(self.retention_days)
    }

    pub fn default_checkpoint_age(&self) -> TimeDelta {
        TimeDelta::days(self.default_checkpoint_age_days)
    }

    pub fn lookback(&self) -> TimeDelta {
        TimeDelta::days(self.lookback_days)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = path.into();
        self
    }

    pub fn with_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = path.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }
}

/// Postgres connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, CommonError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            url: parse_var_or("DATABASE_URL", defaults.url)?,
            max_connections: parse_var_or("DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            connect_timeout_secs: parse_var_or(
                "DATABASE_CONNECT_TIMEOUT",
                defaults.connect_timeout_secs,
            )?,
        };

        if config.max_connections == 0 {
            return Err(CommonError::config("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
