use faultline_core::{ContextLimits, FingerprintConfig};
use std::time::Duration;

const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_WRITE_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 25;
const DEFAULT_ALERT_INTERVAL_SECS: u64 = 15 * 60;
const DEFAULT_MAX_TRACKED_ALERTS: usize = 4_096;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;
const DEFAULT_TOP_N: usize = 10;
const DEFAULT_MAX_TRACEBACK_CHARS: usize = 10_000;
const DEFAULT_MAX_RECENT_OCCURRENCES: usize = 20;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub enabled: bool,
    pub store_timeout: Duration,
    pub max_write_retries: u32,
    pub retry_backoff: Duration,
    pub alert_interval: Duration,
    pub max_tracked_alerts: usize,
    pub retention_days: u32,
    pub maintenance_interval: Duration,
    pub top_n: usize,
    pub context_limits: ContextLimits,
    pub fingerprint: FingerprintConfig,
    pub max_traceback_chars: usize,
    /// Per-fingerprint occurrence history kept by the store.
    pub max_recent_occurrences: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            max_write_retries: DEFAULT_WRITE_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            alert_interval: Duration::from_secs(DEFAULT_ALERT_INTERVAL_SECS),
            max_tracked_alerts: DEFAULT_MAX_TRACKED_ALERTS,
            retention_days: DEFAULT_RETENTION_DAYS,
            maintenance_interval: Duration::from_secs(DEFAULT_MAINTENANCE_INTERVAL_SECS),
            top_n: DEFAULT_TOP_N,
            context_limits: ContextLimits::default(),
            fingerprint: FingerprintConfig::default(),
            max_traceback_chars: DEFAULT_MAX_TRACEBACK_CHARS,
            max_recent_occurrences: DEFAULT_MAX_RECENT_OCCURRENCES,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup`, falling back to defaults for
    /// missing or malformed values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(enabled) = lookup("FAULTLINE_ENABLED").and_then(|value| parse_flag(&value)) {
            config.enabled = enabled;
        }
        if let Some(ms) = parse_number::<u64>(lookup("FAULTLINE_STORE_TIMEOUT_MS")) {
            config.store_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(retries) = parse_number::<u32>(lookup("FAULTLINE_WRITE_RETRIES")) {
            config.max_write_retries = retries;
        }
        if let Some(secs) = parse_number::<u64>(lookup("FAULTLINE_ALERT_INTERVAL_SECS")) {
            config.alert_interval = Duration::from_secs(secs);
        }
        if let Some(days) = parse_number::<u32>(lookup("FAULTLINE_RETENTION_DAYS")) {
            config.retention_days = days.max(1);
        }
        if let Some(secs) = parse_number::<u64>(lookup("FAULTLINE_MAINTENANCE_INTERVAL_SECS")) {
            config.maintenance_interval = Duration::from_secs(secs.max(1));
        }

        config
    }
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|raw| raw.trim().parse().ok())
}
