//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use checkout::CoordinatorConfig;
use lock::LockOptions;
use outbox::RelayConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs in memory
/// - `LOCK_LEASE_MS`, `LOCK_WAIT_MS`: workflow lock bounds (3000 / 0)
/// - `ORDER_SHEET_TTL_SECS`: order sheet lifetime (10800)
/// - `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_SWEEP_INTERVAL_MS`,
///   `OUTBOX_BATCH_SIZE`, `OUTBOX_MAX_ATTEMPTS`, `OUTBOX_TOPIC`: relay settings
/// - `COLLECTOR_URL`, `COLLECTOR_TIMEOUT_MS`: order collector endpoint; unset
///   only logs
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub lock_lease: Duration,
    pub lock_wait: Duration,
    pub sheet_ttl: Duration,
    pub outbox_poll_interval: Duration,
    pub outbox_sweep_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_max_attempts: u32,
    pub outbox_topic: String,
    pub collector_url: Option<String>,
    pub collector_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: non_empty("DATABASE_URL"),
            lock_lease: millis("LOCK_LEASE_MS", defaults.lock_lease),
            lock_wait: millis("LOCK_WAIT_MS", defaults.lock_wait),
            sheet_ttl: parsed("ORDER_SHEET_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sheet_ttl),
            outbox_poll_interval: millis("OUTBOX_POLL_INTERVAL_MS", defaults.outbox_poll_interval),
            outbox_sweep_interval: millis(
                "OUTBOX_SWEEP_INTERVAL_MS",
                defaults.outbox_sweep_interval,
            ),
            outbox_batch_size: parsed("OUTBOX_BATCH_SIZE")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.outbox_batch_size),
            outbox_max_attempts: parsed("OUTBOX_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.outbox_max_attempts),
            outbox_topic: non_empty("OUTBOX_TOPIC").unwrap_or(defaults.outbox_topic),
            collector_url: non_empty("COLLECTOR_URL"),
            collector_timeout: millis("COLLECTOR_TIMEOUT_MS", defaults.collector_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            lock: LockOptions::new(self.lock_wait, self.lock_lease),
            sheet_ttl: self.sheet_ttl,
            ..CoordinatorConfig::default()
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: self.outbox_poll_interval,
            sweep_interval: self.outbox_sweep_interval,
            batch_size: self.outbox_batch_size,
            max_attempts: self.outbox_max_attempts,
            topic: self.outbox_topic.clone(),
            ..RelayConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let coordinator = CoordinatorConfig::default();
        let relay = RelayConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            lock_lease: coordinator.lock.lease,
            lock_wait: coordinator.lock.wait,
            sheet_ttl: coordinator.sheet_ttl,
            outbox_poll_interval: relay.poll_interval,
            outbox_sweep_interval: relay.sweep_interval,
            outbox_batch_size: relay.batch_size,
            outbox_max_attempts: relay.max_attempts,
            outbox_topic: relay.topic,
            collector_url: None,
            collector_timeout: Duration::from_secs(2),
        }
    }
}
