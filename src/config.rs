//! Global configuration parsing, validation, and credential loading.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name used for runtime credentials.
pub const KEYRING_SERVICE: &str = "outreach-queue";

/// Dispatcher loop tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DispatcherConfig {
    /// Seconds between dispatch passes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Maximum actions fetched per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Upper bound on a single executor call.
    #[serde(default = "default_executor_timeout")]
    pub executor_timeout_seconds: u64,
    /// Push `scheduled_at` to the next local day when the quota denies an action.
    #[serde(default = "default_true")]
    pub defer_on_quota: bool,
    /// First local hour (inclusive) during which passes run.
    #[serde(default)]
    pub active_hours_start: Option<u32>,
    /// Last local hour (exclusive) during which passes run.
    #[serde(default)]
    pub active_hours_end: Option<u32>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            batch_size: default_batch_size(),
            executor_timeout_seconds: default_executor_timeout(),
            defer_on_quota: true,
            active_hours_start: None,
            active_hours_end: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    1800
}

fn default_batch_size() -> u32 {
    10
}

fn default_executor_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Retry and backoff policy for failed executions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// `max_retries` assigned to newly enqueued actions.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Backoff for the first retry; doubled for each subsequent one.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_seconds: u64,
    /// Backoff ceiling.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            base_backoff_seconds: default_base_backoff(),
            max_backoff_seconds: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    60
}

fn default_max_backoff() -> u64 {
    3600
}

/// Daily quota limits keyed by action-type prefix.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QuotaConfig {
    /// Limit applied to action types that match no configured prefix.
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: u32,
    /// Randomize each day's effective limit to 90–99 % of the configured one.
    #[serde(default)]
    pub jitter: bool,
    /// Prefix → daily limit. The longest matching prefix names the bucket.
    #[serde(default)]
    pub limits: HashMap<String, u32>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_daily_limit: default_daily_limit(),
            jitter: false,
            limits: HashMap::new(),
        }
    }
}

fn default_daily_limit() -> u32 {
    50
}

/// Human-in-the-loop validation policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    /// Rejections after which a prospect is closed.
    #[serde(default = "default_rejection_threshold")]
    pub rejection_threshold: u32,
    /// Extra action types that must be held for review.
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            rejection_threshold: default_rejection_threshold(),
            required: Vec::new(),
        }
    }
}

fn default_rejection_threshold() -> u32 {
    3
}

/// Outbound HTTP transport settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TransportConfig {
    /// Messaging provider endpoint receiving send requests.
    pub endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_transport_timeout")]
    pub timeout_seconds: u64,
}

fn default_transport_timeout() -> u64 {
    15
}

fn default_db_path() -> PathBuf {
    PathBuf::from("outreach.db")
}

fn default_retention_days() -> u32 {
    30
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Days a terminal action is kept before purge.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Offset of the operator's local calendar day from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Dispatcher loop tuning.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Retry and backoff policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Daily quota limits.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Validation policy.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Outbound transport; absent means the binary cannot send.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
    /// Per-action-type message templates.
    #[serde(default)]
    pub templates: HashMap<String, String>,
    /// Transport API key (populated at runtime).
    #[serde(skip)]
    pub transport_api_key: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
            utc_offset_minutes: 0,
            dispatcher: DispatcherConfig::default(),
            retry: RetryConfig::default(),
            quota: QuotaConfig::default(),
            validation: ValidationConfig::default(),
            transport: None,
            templates: HashMap::new(),
            transport_api_key: String::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the transport API key from OS keychain with env-var fallback.
    ///
    /// Skipped when no transport is configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env var provide the key.
    pub async fn load_credentials(&mut self) -> Result<()> {
        if self.transport.is_some() {
            self.transport_api_key =
                load_credential("transport_api_key", "OUTREACH_TRANSPORT_API_KEY").await?;
        }
        Ok(())
    }

    /// Fixed offset defining the local calendar day.
    #[must_use]
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Local calendar date of an instant.
    #[must_use]
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.local_offset()).date_naive()
    }

    /// Bounded wait for a single executor invocation.
    #[must_use]
    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatcher.executor_timeout_seconds)
    }

    /// Interval between dispatch passes.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.dispatcher.poll_interval_seconds)
    }

    fn validate(&self) -> Result<()> {
        // Quota usage is counted from today's success rows; purging them resets the cap.
        if self.retention_days == 0 {
            return Err(AppError::Config(
                "retention_days must be at least 1".into(),
            ));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(AppError::Config(
                "dispatcher.batch_size must be greater than zero".into(),
            ));
        }
        if self.dispatcher.poll_interval_seconds == 0 {
            return Err(AppError::Config(
                "dispatcher.poll_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.dispatcher.executor_timeout_seconds == 0 {
            return Err(AppError::Config(
                "dispatcher.executor_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.retry.base_backoff_seconds > self.retry.max_backoff_seconds {
            return Err(AppError::Config(
                "retry.base_backoff_seconds must not exceed retry.max_backoff_seconds".into(),
            ));
        }
        if self.validation.rejection_threshold == 0 {
            return Err(AppError::Config(
                "validation.rejection_threshold must be greater than zero".into(),
            ));
        }
        if self.utc_offset_minutes.abs() > 18 * 60 {
            return Err(AppError::Config(
                "utc_offset_minutes must be within ±18 hours".into(),
            ));
        }

        match (
            self.dispatcher.active_hours_start,
            self.dispatcher.active_hours_end,
        ) {
            (None, None) => {}
            (Some(start), Some(end)) if start < end && end <= 24 => {}
            _ => {
                return Err(AppError::Config(
                    "active hours require both start and end with start < end <= 24".into(),
                ));
            }
        }

        if let Some(ref transport) = self.transport {
            if transport.endpoint.trim().is_empty() {
                return Err(AppError::Config("transport.endpoint must not be empty".into()));
            }
            if transport.timeout_seconds == 0 {
                return Err(AppError::Config(
                    "transport.timeout_seconds must be greater than zero".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
