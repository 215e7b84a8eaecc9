use crate::domain::models::AppointmentStatus;
use crate::domain::projection::DEFAULT_BUFFER_MINUTES;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const SCHEDULING_JSON: &str = "scheduling.json";
const SUPPORTED_SCHEMA: u64 = 1;
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/";
pub const DEFAULT_DAYS_TO_SHOW: u32 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_API_BASE_URL: &str = "SLOTSYNC_API_BASE_URL";
const ENV_TIMEZONE: &str = "SLOTSYNC_TIMEZONE";
const ENV_BUFFER_MINUTES: &str = "SLOTSYNC_BUFFER_MINUTES";
const ENV_INITIAL_STATUS: &str = "SLOTSYNC_INITIAL_STATUS";
const ENV_DAYS_TO_SHOW: &str = "SLOTSYNC_DAYS_TO_SHOW";
const ENV_REQUEST_TIMEOUT_SECS: &str = "SLOTSYNC_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u8) -> Duration {
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(2u64.saturating_pow(u32::from(attempt))),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingConfig {
    pub api_base_url: Url,
    pub time_zone: Tz,
    pub buffer_minutes: u32,
    pub initial_booking_status: AppointmentStatus,
    pub days_to_show: u32,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl SchedulingConfig {
    /// Default settings for an API living at `api_base_url`.
    pub fn for_api(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            time_zone: chrono_tz::UTC,
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
            initial_booking_status: AppointmentStatus::Pending,
            days_to_show: DEFAULT_DAYS_TO_SHOW,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    /// The settings a fresh `scheduling.json` describes.
    pub fn defaults() -> Result<Self, InfraError> {
        Ok(Self::for_api(parse_base_url(DEFAULT_API_BASE_URL)?))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulingConfigFile {
    #[serde(default)]
    api_base_url: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    buffer_minutes: Option<u32>,
    #[serde(default)]
    initial_booking_status: Option<String>,
    #[serde(default)]
    days_to_show: Option<u32>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    retry: Option<RetryPolicy>,
}

fn default_config_value() -> serde_json::Value {
    serde_json::json!({
        "schema": SUPPORTED_SCHEMA,
        "apiBaseUrl": DEFAULT_API_BASE_URL,
        "timezone": "UTC",
        "bufferMinutes": DEFAULT_BUFFER_MINUTES,
        "initialBookingStatus": "pending",
        "daysToShow": DEFAULT_DAYS_TO_SHOW,
        "requestTimeoutSecs": DEFAULT_REQUEST_TIMEOUT_SECS,
        "retry": {
            "maxAttempts": 3,
            "baseDelayMs": 200
        }
    })
}

/// Writes `scheduling.json` with defaults when it does not exist yet.
pub fn ensure_default_config(config_dir: &Path) -> Result<PathBuf, InfraError> {
    fs::create_dir_all(config_dir)?;
    let path = config_dir.join(SCHEDULING_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_config_value())?;
        fs::write(&path, format!("{formatted}\n"))?;
    }
    Ok(path)
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_config(config_dir: &Path) -> Result<SchedulingConfig, InfraError> {
    let path = config_dir.join(SCHEDULING_JSON);
    let file: SchedulingConfigFile = serde_json::from_value(read_config(&path)?)?;
    let mut config = SchedulingConfig::defaults()?;

    if let Some(raw) = file.api_base_url.as_deref() {
        config.api_base_url = parse_base_url(raw)?;
    }
    if let Some(raw) = file.timezone.as_deref() {
        config.time_zone = parse_time_zone(raw)?;
    }
    if let Some(minutes) = file.buffer_minutes {
        config.buffer_minutes = minutes;
    }
    if let Some(raw) = file.initial_booking_status.as_deref() {
        config.initial_booking_status = parse_initial_status(raw)?;
    }
    if let Some(days) = file.days_to_show {
        config.days_to_show = validate_days_to_show(days)?;
    }
    if let Some(seconds) = file.request_timeout_secs {
        config.request_timeout = parse_timeout(seconds)?;
    }
    if let Some(retry) = file.retry {
        if retry.max_attempts == 0 {
            return Err(InfraError::InvalidConfig(
                "retry.maxAttempts must be at least 1".to_string(),
            ));
        }
        config.retry = retry;
    }
    Ok(config)
}

/// Loads the config file, then lets `SLOTSYNC_*` environment variables override it.
pub fn load_config_with_env(config_dir: &Path) -> Result<SchedulingConfig, InfraError> {
    let config = load_config(config_dir)?;
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

pub fn apply_env_overrides<F>(
    mut config: SchedulingConfig,
    lookup: F,
) -> Result<SchedulingConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup_value(&lookup, ENV_API_BASE_URL) {
        config.api_base_url = parse_base_url(&raw)?;
    }
    if let Some(raw) = lookup_value(&lookup, ENV_TIMEZONE) {
        config.time_zone = parse_time_zone(&raw)?;
    }
    if let Some(raw) = lookup_value(&lookup, ENV_BUFFER_MINUTES) {
        config.buffer_minutes = parse_number(&raw, ENV_BUFFER_MINUTES)?;
    }
    if let Some(raw) = lookup_value(&lookup, ENV_INITIAL_STATUS) {
        config.initial_booking_status = parse_initial_status(&raw)?;
    }
    if let Some(raw) = lookup_value(&lookup, ENV_DAYS_TO_SHOW) {
        config.days_to_show = validate_days_to_show(parse_number(&raw, ENV_DAYS_TO_SHOW)?)?;
    }
    if let Some(raw) = lookup_value(&lookup, ENV_REQUEST_TIMEOUT_SECS) {
        config.request_timeout = parse_timeout(parse_number(&raw, ENV_REQUEST_TIMEOUT_SECS)?)?;
    }
    Ok(config)
}

fn lookup_value<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(raw: &str, field_name: &str) -> Result<T, InfraError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid {field_name} '{raw}': {error}")))
}

fn parse_base_url(raw: &str) -> Result<Url, InfraError> {
    let url = Url::parse(raw.trim())
        .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url '{raw}': {error}")))?;
    if url.cannot_be_a_base() {
        return Err(InfraError::InvalidConfig(format!(
            "api base url '{raw}' cannot be a base"
        )));
    }
    Ok(url)
}

fn parse_time_zone(raw: &str) -> Result<Tz, InfraError> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{raw}': {error}")))
}

fn parse_initial_status(raw: &str) -> Result<AppointmentStatus, InfraError> {
    match AppointmentStatus::parse(raw) {
        Some(status) if !status.is_terminal() => Ok(status),
        _ => Err(InfraError::InvalidConfig(format!(
            "initial booking status must be pending or confirmed, got '{raw}'"
        ))),
    }
}

fn validate_days_to_show(days: u32) -> Result<u32, InfraError> {
    if days == 0 {
        return Err(InfraError::InvalidConfig(
            "daysToShow must be at least 1".to_string(),
        ));
    }
    Ok(days)
}

fn parse_timeout(seconds: u64) -> Result<Duration, InfraError> {
    if seconds == 0 {
        return Err(InfraError::InvalidConfig(
            "request timeout must be at least 1 second".to_string(),
        ));
    }
    Ok(Duration::from_secs(seconds))
}
