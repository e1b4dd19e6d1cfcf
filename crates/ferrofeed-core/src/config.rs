//! Engine-wide tuning knobs.
//!
//! Defaults match the documented behavior (1 s request spacing, 10 s request
//! timeout, 5 reconnect attempts from a 2 s base). Each value can be
//! overridden from the environment:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `FERROFEED_MIN_REQUEST_SPACING_MS` | `1000` |
//! | `FERROFEED_REQUEST_TIMEOUT_MS` | `10000` |
//! | `FERROFEED_RECONNECT_MAX_ATTEMPTS` | `5` |
//! | `FERROFEED_RECONNECT_BASE_DELAY_MS` | `2000` |
//! | `FERROFEED_RECONNECT_MAX_DELAY_MS` | `30000` |

use std::time::Duration;

use crate::error::SyncError;
use crate::http_client::DEFAULT_TIMEOUT_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub raw_max_delay: Duration,
    pub event_max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(2_000),
            raw_max_delay: Duration::from_secs(30),
            event_max_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimum spacing between two requests for the same source id.
    pub min_request_spacing: Duration,
    /// Request budget used when a source does not set `timeoutMs`.
    pub request_timeout: Duration,
    /// Budget for opening a socket connection.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_request_spacing: Duration::from_millis(1_000),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `FERROFEED_*` variables that are set.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let mut config = Self::default();

        if let Some(ms) = read_u64(&lookup, "FERROFEED_MIN_REQUEST_SPACING_MS")? {
            config.min_request_spacing = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(&lookup, "FERROFEED_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = read_u64(&lookup, "FERROFEED_RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect.max_attempts = u32::try_from(attempts).map_err(|_| {
                SyncError::invalid_config("FERROFEED_RECONNECT_MAX_ATTEMPTS is out of range")
            })?;
        }
        if let Some(ms) = read_u64(&lookup, "FERROFEED_RECONNECT_BASE_DELAY_MS")? {
            config.reconnect.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(&lookup, "FERROFEED_RECONNECT_MAX_DELAY_MS")? {
            config.reconnect.raw_max_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn read_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<u64>, SyncError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| SyncError::invalid_config(format!("{name} must be an integer, got '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.min_request_spacing, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(2));
    }

    #[test]
    fn environment_overrides_are_applied() {
        let vars = HashMap::from([
            ("FERROFEED_MIN_REQUEST_SPACING_MS", "250"),
            ("FERROFEED_RECONNECT_MAX_ATTEMPTS", "3"),
        ]);
        let config = EngineConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
            .expect("valid overrides");

        assert_eq!(config.min_request_spacing, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn malformed_override_is_reported() {
        let error = EngineConfig::from_lookup(|name| {
            (name == "FERROFEED_REQUEST_TIMEOUT_MS").then(|| String::from("soon"))
        })
        .expect_err("non-numeric timeout must fail");

        assert!(error.to_string().contains("FERROFEED_REQUEST_TIMEOUT_MS"));
    }
}
