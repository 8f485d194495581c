use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000/ws/signals";
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Runtime settings for the desk, read from the process environment
/// (after `dotenvy` has loaded any `.env` file).
#[derive(Debug, Clone, PartialEq)]
pub struct DeskConfig {
    pub api_url: String,
    pub ws_url: String,
    pub api_token: Option<String>,
    pub buffer_capacity: usize,
    pub snapshot_limit: usize,
    pub snapshot_interval: Duration,
    pub fetch_timeout: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    /// Raw JSON filter spec applied when the desk starts.
    pub initial_filter: Option<String>,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            api_token: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            snapshot_limit: DEFAULT_BUFFER_CAPACITY,
            snapshot_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            reconnect_min: Duration::from_millis(1_000),
            reconnect_max: Duration::from_millis(30_000),
            initial_filter: None,
        }
    }
}

impl DeskConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or blank keys fall back
    /// to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let buffer_capacity = parse_or(&get, "SIGNAL_BUFFER_CAPACITY", defaults.buffer_capacity)?;
        if buffer_capacity == 0 {
            return Err(invalid("SIGNAL_BUFFER_CAPACITY", "0", "capacity must be at least 1"));
        }

        let snapshot_limit = parse_or(&get, "SIGNAL_SNAPSHOT_LIMIT", buffer_capacity)?;
        if snapshot_limit == 0 {
            return Err(invalid("SIGNAL_SNAPSHOT_LIMIT", "0", "limit must be at least 1"));
        }

        let interval_secs: u64 = parse_or(&get, "SIGNAL_SNAPSHOT_INTERVAL_SECS", 30)?;
        if interval_secs == 0 {
            return Err(invalid(
                "SIGNAL_SNAPSHOT_INTERVAL_SECS",
                "0",
                "interval must be at least one second",
            ));
        }

        let timeout_secs: u64 = parse_or(&get, "SIGNAL_FETCH_TIMEOUT_SECS", 10)?;
        let reconnect_min_ms: u64 = parse_or(&get, "SIGNAL_RECONNECT_MIN_MS", 1_000)?;
        let reconnect_max_ms: u64 = parse_or(&get, "SIGNAL_RECONNECT_MAX_MS", 30_000)?;
        if reconnect_max_ms < reconnect_min_ms {
            return Err(invalid(
                "SIGNAL_RECONNECT_MAX_MS",
                &reconnect_max_ms.to_string(),
                "must not be below SIGNAL_RECONNECT_MIN_MS",
            ));
        }

        Ok(Self {
            api_url: get("SIGNAL_API_URL").unwrap_or(defaults.api_url),
            ws_url: get("SIGNAL_WS_URL").unwrap_or(defaults.ws_url),
            api_token: get("SIGNAL_API_TOKEN"),
            buffer_capacity,
            snapshot_limit,
            snapshot_interval: Duration::from_secs(interval_secs),
            fetch_timeout: Duration::from_secs(timeout_secs),
            reconnect_min: Duration::from_millis(reconnect_min_ms),
            reconnect_max: Duration::from_millis(reconnect_max_ms),
            initial_filter: get("SIGNAL_FILTER"),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = DeskConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DeskConfig::default());
        assert_eq!(config.buffer_capacity, 100);
        assert_eq!(config.reconnect_max, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = DeskConfig::from_lookup(lookup(&[
            ("SIGNAL_API_URL", "https://desk.example.com/api"),
            ("SIGNAL_API_TOKEN", "secret"),
            ("SIGNAL_BUFFER_CAPACITY", "250"),
            ("SIGNAL_SNAPSHOT_INTERVAL_SECS", "5"),
            ("SIGNAL_FILTER", r#"{"decision":"ALERT"}"#),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "https://desk.example.com/api");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.buffer_capacity, 250);
        // Snapshot limit follows the capacity unless set explicitly.
        assert_eq!(config.snapshot_limit, 250);
        assert_eq!(config.snapshot_interval, Duration::from_secs(5));
        assert_eq!(config.initial_filter.as_deref(), Some(r#"{"decision":"ALERT"}"#));
    }

    #[test]
    fn test_blank_token_is_treated_as_absent() {
        let config = DeskConfig::from_lookup(lookup(&[("SIGNAL_API_TOKEN", "   ")])).unwrap();
        assert_eq!(config.api_token, None);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let err = DeskConfig::from_lookup(lookup(&[("SIGNAL_BUFFER_CAPACITY", "0")])).unwrap_err();
        let ConfigError::Invalid { key, .. } = err;
        assert_eq!(key, "SIGNAL_BUFFER_CAPACITY");
    }

    #[test]
    fn test_unparseable_number_names_the_variable() {
        let err = DeskConfig::from_lookup(lookup(&[("SIGNAL_RECONNECT_MIN_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("SIGNAL_RECONNECT_MIN_MS"));
    }

    #[test]
    fn test_backoff_cap_below_floor_is_rejected() {
        let result = DeskConfig::from_lookup(lookup(&[
            ("SIGNAL_RECONNECT_MIN_MS", "5000"),
            ("SIGNAL_RECONNECT_MAX_MS", "1000"),
        ]));
        assert!(result.is_err());
    }
}
