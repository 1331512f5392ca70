//! Configuration management for the client.

use std::env;
use std::time::Duration;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 9090;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_BATCH_CONCURRENCY: usize = 8;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Store host name
    pub host: String,
    /// Store port
    pub port: u16,
    /// Per-call timeout
    pub timeout: Duration,
    /// Transport retries after the first attempt
    pub max_retries: u32,
    /// Base delay between transport retries
    pub retry_delay: Duration,
    /// Conflict recoveries per mutation
    pub conflict_retries: u32,
    /// Mutation engines run at once by a resolved batch
    pub batch_concurrency: usize,
    /// SQLite URL of the local cache mirror, if any
    pub cache_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            conflict_retries: DEFAULT_MAX_RETRIES * 2,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            cache_url: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unset and zero numeric values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("SCD_HOST")
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = parse(&lookup, "SCD_PORT")?.unwrap_or(DEFAULT_PORT);
        let timeout_ms = parse(&lookup, "SCD_TIMEOUT_MS")?.unwrap_or(DEFAULT_TIMEOUT_MS);
        let max_retries = parse(&lookup, "SCD_MAX_RETRIES")?.unwrap_or(DEFAULT_MAX_RETRIES);
        let retry_delay_ms =
            parse(&lookup, "SCD_RETRY_DELAY_MS")?.unwrap_or(DEFAULT_RETRY_DELAY_MS);
        let conflict_retries =
            parse(&lookup, "SCD_CONFLICT_RETRIES")?.unwrap_or(max_retries.saturating_mul(2));
        let batch_concurrency =
            parse(&lookup, "SCD_BATCH_CONCURRENCY")?.unwrap_or(DEFAULT_BATCH_CONCURRENCY);
        let cache_url = lookup("SCD_CACHE_URL").filter(|u| !u.trim().is_empty());

        Ok(Self {
            host,
            port,
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            conflict_retries,
            batch_concurrency,
            cache_url,
        })
    }

    /// Base URL of the store.
    pub fn target(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Parse a numeric variable; zero counts as unset.
fn parse<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Default + PartialEq,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => {
            let value: T = raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                key,
                value: raw.clone(),
            })?;
            Ok((value != T::default()).then_some(value))
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}
