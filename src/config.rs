//! Configuration loading and validation.
//!
//! Settings come from an optional `poolwatch.toml` (every section uses
//! `#[serde(default)]`, so an empty or missing file is valid), then from
//! environment variables, which take precedence. The result is validated
//! once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::detector::DetectorConfig;
use crate::notifier::NotifierConfig;

/// Environment variable holding the webhook URL.
pub const ENV_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";
/// Environment variable overriding the error-rate threshold (percent).
pub const ENV_ERROR_THRESHOLD: &str = "ERROR_RATE_THRESHOLD";
/// Environment variable overriding the window size.
pub const ENV_WINDOW_SIZE: &str = "WINDOW_SIZE";
/// Environment variable overriding the evaluation interval.
pub const ENV_EVALUATE_EVERY: &str = "EVALUATE_EVERY";
/// Environment variable overriding the alert cooldown (seconds).
pub const ENV_COOLDOWN_SECS: &str = "ALERT_COOLDOWN_SEC";
/// Environment variable toggling maintenance mode.
pub const ENV_MAINTENANCE_MODE: &str = "MAINTENANCE_MODE";
/// Environment variable overriding the active pool label.
pub const ENV_ACTIVE_POOL: &str = "ACTIVE_POOL";
/// Environment variable overriding the access log path.
pub const ENV_LOG_FILE: &str = "NGINX_LOG_FILE";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolwatchConfig {
    /// Access log source.
    #[serde(default)]
    pub source: SourceConfig,

    /// Error-rate detection tuning.
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Alert delivery settings.
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Diagnostic log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how often to read the access log.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Path of the proxy access log.
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    /// Sleep between polls when no new lines are available.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on the backoff while the log file is unavailable.
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,

    /// Read existing file content on startup instead of tailing from the end.
    #[serde(default)]
    pub start_from_beginning: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_max_secs: default_retry_max_secs(),
            start_from_beginning: false,
        }
    }
}

/// Error-rate detection tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Error-rate breach threshold in percent.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,

    /// Records per evaluation window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Evaluate the error rate on every Nth record.
    #[serde(default = "default_evaluate_every")]
    pub evaluate_every: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            window_size: default_window_size(),
            evaluate_every: default_evaluate_every(),
        }
    }
}

/// Alert delivery settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Webhook URL. Alerts are not sent when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Minimum seconds between two alerts with the same key.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Global mute of all alerts.
    #[serde(default)]
    pub maintenance_mode: bool,

    /// Informational label of the expected active pool.
    #[serde(default = "default_active_pool")]
    pub active_pool: String,

    /// Display name attached to webhook messages.
    #[serde(default = "default_username")]
    pub username: String,

    /// Icon attached to webhook messages.
    #[serde(default = "default_icon_emoji")]
    pub icon_emoji: String,

    /// Webhook request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Bound on distinct alert keys tracked for cooldown.
    #[serde(default = "default_max_cooldown_keys")]
    pub max_cooldown_keys: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            cooldown_secs: default_cooldown_secs(),
            maintenance_mode: false,
            active_pool: default_active_pool(),
            username: default_username(),
            icon_emoji: default_icon_emoji(),
            timeout_secs: default_timeout_secs(),
            max_cooldown_keys: default_max_cooldown_keys(),
        }
    }
}

/// Diagnostic log output.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rotated JSON logs. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Filter directives used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_log_level(),
        }
    }
}

impl PoolwatchConfig {
    /// Validate that configuration values are within sane bounds.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.detection.error_threshold.is_finite()
                && (0.0..=100.0).contains(&self.detection.error_threshold),
            "error_threshold must be in [0, 100]"
        );
        anyhow::ensure!(
            self.detection.window_size >= 1,
            "window_size must be >= 1"
        );
        anyhow::ensure!(
            self.detection.evaluate_every >= 1,
            "evaluate_every must be >= 1"
        );
        anyhow::ensure!(
            self.source.poll_interval_ms >= 1,
            "poll_interval_ms must be >= 1"
        );
        anyhow::ensure!(
            self.source.retry_max_secs >= 1,
            "retry_max_secs must be >= 1"
        );
        anyhow::ensure!(
            self.alerts.timeout_secs >= 1,
            "alerts.timeout_secs must be >= 1"
        );
        anyhow::ensure!(
            self.alerts.max_cooldown_keys >= 1,
            "alerts.max_cooldown_keys must be >= 1"
        );
        anyhow::ensure!(
            i64::try_from(self.alerts.cooldown_secs).is_ok(),
            "alerts.cooldown_secs is out of range"
        );
        if let Some(webhook_url) = &self.alerts.webhook_url {
            let parsed =
                url::Url::parse(webhook_url).context("alerts.webhook_url is not a valid URL")?;
            anyhow::ensure!(
                parsed.scheme() == "http" || parsed.scheme() == "https",
                "alerts.webhook_url must use http or https"
            );
        }
        Ok(())
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Empty values are ignored. `lookup` is usually `std::env::var(..).ok()`;
    /// tests pass a map instead.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or boolean variable cannot be parsed.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_WEBHOOK_URL) {
            self.alerts.webhook_url = Some(v.trim().to_owned());
        }
        if let Some(v) = get(ENV_ERROR_THRESHOLD) {
            self.detection.error_threshold = parse_env(ENV_ERROR_THRESHOLD, &v)?;
        }
        if let Some(v) = get(ENV_WINDOW_SIZE) {
            self.detection.window_size = parse_env(ENV_WINDOW_SIZE, &v)?;
        }
        if let Some(v) = get(ENV_EVALUATE_EVERY) {
            self.detection.evaluate_every = parse_env(ENV_EVALUATE_EVERY, &v)?;
        }
        if let Some(v) = get(ENV_COOLDOWN_SECS) {
            self.alerts.cooldown_secs = parse_env(ENV_COOLDOWN_SECS, &v)?;
        }
        if let Some(v) = get(ENV_MAINTENANCE_MODE) {
            self.alerts.maintenance_mode = parse_bool(ENV_MAINTENANCE_MODE, &v)?;
        }
        if let Some(v) = get(ENV_ACTIVE_POOL) {
            self.alerts.active_pool = v.trim().to_owned();
        }
        if let Some(v) = get(ENV_LOG_FILE) {
            self.source.path = PathBuf::from(v.trim());
        }
        Ok(())
    }

    /// Detector settings derived from this configuration.
    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig {
            window_size: self.detection.window_size,
            threshold_percent: self.detection.error_threshold,
            evaluate_every: self.detection.evaluate_every,
        }
    }

    /// Notifier settings derived from this configuration.
    pub fn notifier(&self) -> NotifierConfig {
        let secs = i64::try_from(self.alerts.cooldown_secs).unwrap_or(i64::MAX);
        NotifierConfig {
            cooldown: chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX),
            muted: self.alerts.maintenance_mode,
            active_pool: self.alerts.active_pool.clone(),
            max_cooldown_keys: self.alerts.max_cooldown_keys,
        }
    }

    /// Sleep between polls with no new data.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.source.poll_interval_ms)
    }

    /// Webhook request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.alerts.timeout_secs)
    }
}

/// Parse a TOML configuration string without applying overrides.
///
/// # Errors
///
/// Returns an error if the TOML is malformed.
pub fn parse_config(contents: &str) -> anyhow::Result<PoolwatchConfig> {
    toml::from_str(contents).context("failed to parse poolwatch config")
}

/// Load configuration from an optional TOML file plus the process
/// environment, then validate it.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, an environment
/// override is malformed, or validation fails.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PoolwatchConfig> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            parse_config(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display()))?
        }
        None => PoolwatchConfig::default(),
    };

    // A missing .env file is the normal case.
    let _ = dotenvy::dotenv();

    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

fn parse_env<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {name}: {value:?}"))
}

fn parse_bool(name: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("invalid value for {name}: {other:?} (expected true/false)"),
    }
}

// Default value functions for serde.

fn default_log_path() -> PathBuf {
    PathBuf::from("/var/log/nginx/access.log")
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_retry_max_secs() -> u64 {
    30
}

fn default_error_threshold() -> f64 {
    2.0
}

fn default_window_size() -> usize {
    200
}

fn default_evaluate_every() -> usize {
    1
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_active_pool() -> String {
    "blue".to_owned()
}

fn default_username() -> String {
    "Blue/Green Monitor".to_owned()
}

fn default_icon_emoji() -> String {
    ":warning:".to_owned()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_cooldown_keys() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_owned()
}
