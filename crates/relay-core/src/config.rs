//! Relay configuration
//!
//! # Example
//!
//! ```ignore
//! use relay_core::RelayConfig;
//! use std::time::Duration;
//!
//! let config = RelayConfig::default()
//!     .with_reply_separator(":")
//!     .with_request_timeout(Some(Duration::from_secs(5)));
//! config.validate()?;
//! ```

use crate::error::{RelayError, Result};
use std::env;
use std::time::Duration;

/// Separator between a subject and a correlation id in derived reply subjects.
pub const DEFAULT_REPLY_SEPARATOR: &str = "_";

/// Default time a request may stay pending before it is expired.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval of the background expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Settings shared by request engines and the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Joins subject and correlation id: `<subject><separator><id>`.
    /// Requester and responder must agree on it.
    pub reply_separator: String,

    /// Per-request timeout. `None` keeps requests pending until answered.
    pub request_timeout: Option<Duration>,

    /// How often `spawn_expiry_task` sweeps for expired requests.
    pub sweep_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reply_separator: DEFAULT_REPLY_SEPARATOR.to_string(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RELAY_REPLY_SEPARATOR`: derived subject separator (default: `_`)
    /// - `RELAY_REQUEST_TIMEOUT_MS`: request timeout, `0` disables (default: 30000)
    /// - `RELAY_SWEEP_INTERVAL_MS`: expiry sweep interval (default: 1000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let request_timeout = match lookup("RELAY_REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.request_timeout,
        };

        Self {
            reply_separator: lookup("RELAY_REPLY_SEPARATOR")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.reply_separator),

            request_timeout,

            sweep_interval: lookup("RELAY_SWEEP_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `RelayError::InvalidConfig` for an empty separator, a zero timeout or a
    /// zero sweep interval.
    pub fn validate(&self) -> Result<()> {
        if self.reply_separator.is_empty() {
            return Err(RelayError::InvalidConfig(
                "reply_separator cannot be empty".to_string(),
            ));
        }

        if self.request_timeout == Some(Duration::ZERO) {
            return Err(RelayError::InvalidConfig(
                "request_timeout must be positive (use None to disable)".to_string(),
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(RelayError::InvalidConfig(
                "sweep_interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder-style method to set the reply separator
    pub fn with_reply_separator(mut self, separator: impl Into<String>) -> Self {
        self.reply_separator = separator.into();
        self
    }

    /// Builder-style method to set the request timeout
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder-style method to set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.reply_separator, "_");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("RELAY_REPLY_SEPARATOR", ":"),
            ("RELAY_REQUEST_TIMEOUT_MS", "250"),
            ("RELAY_SWEEP_INTERVAL_MS", "50"),
        ]));
        assert_eq!(config.reply_separator, ":");
        assert_eq!(config.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.sweep_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = RelayConfig::from_lookup(lookup_from(&[("RELAY_REQUEST_TIMEOUT_MS", "0")]));
        assert_eq!(config.request_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("RELAY_REPLY_SEPARATOR", ""),
            ("RELAY_REQUEST_TIMEOUT_MS", "soon"),
            ("RELAY_SWEEP_INTERVAL_MS", "0"),
        ]));
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let empty_separator = RelayConfig::default().with_reply_separator("");
        assert!(matches!(
            empty_separator.validate(),
            Err(RelayError::InvalidConfig(_))
        ));

        let zero_timeout = RelayConfig::default().with_request_timeout(Some(Duration::ZERO));
        assert!(zero_timeout.validate().is_err());

        let zero_sweep = RelayConfig::default().with_sweep_interval(Duration::ZERO);
        assert!(zero_sweep.validate().is_err());
    }
}
