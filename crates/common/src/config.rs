use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::WatchError;
use crate::types::{Destination, MonitoredAddress};

/// Longest accepted `explorer.retry_delay`, in seconds.
pub const MAX_RETRY_DELAY_SECS: f64 = 3600.0;

/// Longest accepted `monitoring.hours_lookback` (one year).
pub const MAX_HOURS_LOOKBACK: u64 = 24 * 365;

/// Longest accepted `monitoring.check_interval`, in seconds (one day).
pub const MAX_CHECK_INTERVAL_SECS: u64 = 24 * 3600;

/// Explorer endpoint and retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerConfig {
    /// Base URL of the explorer API (e.g. `https://api.ergoplatform.com/api/v1`)
    pub url: String,
    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between attempts, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
}

impl ExplorerConfig {
    /// The configured delay, clamped to `0..=MAX_RETRY_DELAY_SECS`.
    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay.clamp(0.0, MAX_RETRY_DELAY_SECS))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrometheusConfig {
    /// Port for the `/metrics` endpoint; metrics are a no-op when absent
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Explorer query window in hours, independent of cursor position
    #[serde(default = "default_hours_lookback")]
    pub hours_lookback: u64,
    /// Seconds between polling ticks
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// UTC hour (0-23) of the daily balance report; `null` disables it
    #[serde(default = "default_daily_report_hour")]
    pub daily_report_hour: Option<u32>,
}

impl MonitoringConfig {
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.hours_lookback.saturating_mul(3600))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            hours_lookback: default_hours_lookback(),
            check_interval: default_check_interval(),
            daily_report_hour: default_daily_report_hour(),
        }
    }
}

/// Bot credentials and the global fallback destination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub default_chat_id: Option<String>,
    #[serde(default)]
    pub default_topic_id: Option<i64>,
}

impl TelegramConfig {
    /// The global fallback destination, if a default chat is configured.
    pub fn default_destination(&self) -> Option<Destination> {
        self.default_chat_id
            .as_ref()
            .filter(|chat| !chat.trim().is_empty())
            .map(|chat| Destination::new(chat.clone(), self.default_topic_id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressConfig {
    pub address: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub telegram_destinations: Vec<Destination>,
    /// Include this address in the daily balance report
    #[serde(default = "default_report_balance")]
    pub report_balance: bool,
}

/// Watcher configuration loaded from the JSON config file.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub addresses: Vec<AddressConfig>,
}

impl MonitorConfig {
    /// Read and parse the config file.
    ///
    /// Not validated yet: the bot token may still come from the environment
    /// (see [`with_token_override`](Self::with_token_override)).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WatchError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, WatchError> {
        serde_json::from_str(raw)
            .map_err(|e| WatchError::Config(format!("malformed configuration: {}", e)))
    }

    /// Parse and validate.
    pub fn from_json(raw: &str) -> Result<Self, WatchError> {
        let config = Self::parse(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TELEGRAM_BOT_TOKEN` from the environment over the file value.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = Some(token);
        }
        self
    }

    pub fn validate(&self) -> Result<(), WatchError> {
        let url = self.explorer.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(WatchError::Config(format!(
                "explorer.url must be an http(s) URL, got {:?}",
                self.explorer.url
            )));
        }
        if !(1..=MAX_CHECK_INTERVAL_SECS).contains(&self.monitoring.check_interval) {
            return Err(WatchError::Config(format!(
                "monitoring.check_interval must be between 1 and {} seconds",
                MAX_CHECK_INTERVAL_SECS
            )));
        }
        if !(1..=MAX_HOURS_LOOKBACK).contains(&self.monitoring.hours_lookback) {
            return Err(WatchError::Config(format!(
                "monitoring.hours_lookback must be between 1 and {}",
                MAX_HOURS_LOOKBACK
            )));
        }
        if !(0.0..=MAX_RETRY_DELAY_SECS).contains(&self.explorer.retry_delay) {
            return Err(WatchError::Config(format!(
                "explorer.retry_delay must be between 0 and {} seconds",
                MAX_RETRY_DELAY_SECS
            )));
        }
        if let Some(hour) = self.monitoring.daily_report_hour
            && hour > 23
        {
            return Err(WatchError::Config(
                "monitoring.daily_report_hour must be between 0 and 23".to_string(),
            ));
        }
        if self.addresses.is_empty() {
            return Err(WatchError::Config("no addresses configured".to_string()));
        }

        let mut seen = HashSet::new();
        for entry in &self.addresses {
            if entry.address.trim().is_empty() {
                return Err(WatchError::Config("empty address entry".to_string()));
            }
            if !seen.insert(entry.address.as_str()) {
                return Err(WatchError::Config(format!(
                    "duplicate address {}",
                    entry.address
                )));
            }
            if entry
                .telegram_destinations
                .iter()
                .any(|d| d.chat_id.trim().is_empty())
            {
                return Err(WatchError::Config(format!(
                    "address {} has a destination with an empty chat_id",
                    entry.address
                )));
            }
        }

        let deliverable = self
            .monitored_addresses()
            .iter()
            .any(MonitoredAddress::is_deliverable);
        let has_token = self
            .telegram
            .bot_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if deliverable && !has_token {
            return Err(WatchError::Config(
                "telegram.bot_token is required when any address has a destination".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve each configured address into its immutable runtime form.
    ///
    /// Destination resolution order: the address's own destinations, then the
    /// telegram default chat/topic, then none (undeliverable).
    pub fn monitored_addresses(&self) -> Vec<MonitoredAddress> {
        let fallback = self.telegram.default_destination();

        self.addresses
            .iter()
            .map(|entry| {
                let destinations = if entry.telegram_destinations.is_empty() {
                    fallback.iter().cloned().collect()
                } else {
                    entry.telegram_destinations.clone()
                };

                MonitoredAddress {
                    address: entry.address.clone(),
                    nickname: entry
                        .nickname
                        .clone()
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| entry.address.chars().take(8).collect()),
                    destinations,
                }
            })
            .collect()
    }

    /// The monitored addresses that opted into the daily balance report.
    pub fn balance_report_addresses(&self) -> Vec<MonitoredAddress> {
        self.addresses
            .iter()
            .zip(self.monitored_addresses())
            .filter(|(entry, _)| entry.report_balance)
            .map(|(_, address)| address)
            .collect()
    }
}

/// Process-level settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Path to the JSON config file
    pub config_path: String,

    /// PostgreSQL connection string; cursors go to `cursor_state_path` when unset
    pub database_url: Option<String>,

    /// JSON file holding cursors when no database is configured
    pub cursor_state_path: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 5)
    pub db_max_connections: u32,

    /// Bot token overriding `telegram.bot_token`
    pub telegram_bot_token: Option<String>,

    /// Telegram Bot API base URL
    pub telegram_api_url: String,

    /// Per-request timeout for explorer calls
    pub explorer_timeout: Duration,

    /// Per-request timeout for Telegram calls
    pub telegram_timeout: Duration,

    /// Maximum address checks running at once
    pub check_concurrency: usize,

    /// Maximum concurrent deliveries per event
    pub dispatch_concurrency: usize,

    /// Attempts per notification task before giving up
    pub delivery_max_attempts: u32,

    /// Time in-flight checks get to finish on shutdown
    pub shutdown_grace: Duration,

    /// Emit JSON logs (default) or human-readable ones
    pub json_logs: bool,
}

impl RuntimeSettings {
    /// Load settings from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            config_path: std::env::var("CHAINWATCH_CONFIG")
                .unwrap_or_else(|_| "config.json".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            cursor_state_path: std::env::var("CURSOR_STATE_PATH")
                .unwrap_or_else(|_| "chainwatch-cursors.json".to_string()),
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 5)?,
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_api_url: std::env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            explorer_timeout: Duration::from_secs(parse_env("EXPLORER_TIMEOUT_SECS", 30)?),
            telegram_timeout: Duration::from_secs(parse_env("TELEGRAM_TIMEOUT_SECS", 15)?),
            check_concurrency: parse_env::<usize>("CHECK_CONCURRENCY", 8)?.max(1),
            dispatch_concurrency: parse_env::<usize>("DISPATCH_CONCURRENCY", 4)?.max(1),
            delivery_max_attempts: parse_env::<u32>("DELIVERY_MAX_ATTEMPTS", 5)?.max(1),
            shutdown_grace: Duration::from_secs(parse_env("SHUTDOWN_GRACE_SECS", 20)?),
            json_logs: std::env::var("LOG_FORMAT")
                .map(|v| !v.eq_ignore_ascii_case("pretty"))
                .unwrap_or(true),
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid {}", name, std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    5.0
}

fn default_hours_lookback() -> u64 {
    1
}

fn default_check_interval() -> u64 {
    60
}

fn default_daily_report_hour() -> Option<u32> {
    Some(12)
}

fn default_report_balance() -> bool {
    true
}
