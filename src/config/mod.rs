//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_QUEUE_NAME: &str = "generate_report_queue";
pub const DEFAULT_LOCK_PREFIX: &str = "lock:";
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// pgmq queue carrying report jobs.
    pub queue_name: String,
    /// Prepended to the survey id to name its coalescing lock.
    pub lock_prefix: String,
    /// Length of the coalescing window.
    pub lock_ttl: Duration,
    /// Seconds a read message stays invisible to other workers.
    pub visibility_timeout: i32,
    /// How long an idle worker waits before polling the queue again.
    pub poll_interval: Duration,
    /// Simulated duration of one report generation.
    pub report_work: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            queue_name: std::env::var("REPORT_QUEUE")
                .unwrap_or_else(|_| DEFAULT_QUEUE_NAME.to_string()),
            lock_prefix: std::env::var("LOCK_PREFIX")
                .unwrap_or_else(|_| DEFAULT_LOCK_PREFIX.to_string()),
            lock_ttl: lock_ttl()?,
            visibility_timeout: parsed_var("VISIBILITY_TIMEOUT_SECS", 60)?,
            poll_interval: Duration::from_millis(parsed_var("POLL_INTERVAL_MS", 1000)?),
            report_work: Duration::from_millis(parsed_var("REPORT_WORK_MS", 2000)?),
        })
    }
}

/// `LOCK_TTL_SECS`, at least one second.
fn lock_ttl() -> Result<Duration> {
    match parsed_var("LOCK_TTL_SECS", DEFAULT_LOCK_TTL.as_secs())? {
        0 => Err(Error::Config("LOCK_TTL_SECS must be at least 1".to_string())),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value {raw:?} for {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
