//! Environment-based configuration for the `relay` CLI.
//!
//! - `RELAY_API_URL` - relayer base URL (default: `http://localhost:3001`)
//! - `RELAY_REQUEST_TIMEOUT_MS` - per-request timeout (default: 30000)
//! - `RELAY_POLL_INTERVAL_MS` - status poll interval (default: 5000)
//! - `RELAY_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! - `RELAY_LOG_JSON` - "1" or "true" for JSON log lines
//!
//! A `.env` file in the working directory is loaded first if present.
//! The signing key is never part of this struct; it is read by the
//! subcommands that need it (`RELAY_SECRET_KEY`).

use std::env;
use std::str::FromStr;

use thiserror::Error;

use relay_api::ClientOptions;
use relay_tracker::PollConfig;

use crate::logging::LogLevel;

pub const DEFAULT_API_URL: &str = "http://localhost:3001";

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub log_level: LogLevel,
    pub log_json: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_ms: 30_000,
            poll_interval_ms: 5_000,
            log_level: LogLevel::Info,
            log_json: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = match lookup("RELAY_API_URL") {
            Some(url) => validate_url("RELAY_API_URL", url)?,
            None => defaults.api_url,
        };

        let request_timeout_ms = match lookup("RELAY_REQUEST_TIMEOUT_MS") {
            Some(v) => parse_positive("RELAY_REQUEST_TIMEOUT_MS", &v)?,
            None => defaults.request_timeout_ms,
        };

        let poll_interval_ms = match lookup("RELAY_POLL_INTERVAL_MS") {
            Some(v) => parse_positive("RELAY_POLL_INTERVAL_MS", &v)?,
            None => defaults.poll_interval_ms,
        };

        let log_level = lookup("RELAY_LOG_LEVEL")
            .map(|v| LogLevel::from(v.as_str()))
            .unwrap_or(defaults.log_level);

        let log_json = match lookup("RELAY_LOG_JSON") {
            Some(v) => parse_bool("RELAY_LOG_JSON", &v)?,
            None => defaults.log_json,
        };

        Ok(Self {
            api_url,
            request_timeout_ms,
            poll_interval_ms,
            log_level,
            log_json,
        })
    }

    /// Override the relayer URL (from a command-line flag).
    pub fn with_api_url(mut self, url: Option<String>) -> Result<Self, ConfigError> {
        if let Some(url) = url {
            self.api_url = validate_url("--api-url", url)?;
        }
        Ok(self)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout_ms: self.request_timeout_ms,
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval_ms: self.poll_interval_ms,
            ..PollConfig::default()
        }
    }
}

fn validate_url(name: &str, url: String) -> Result<String, ConfigError> {
    let url = url.trim().to_string();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url)
    } else {
        Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("expected an http(s) URL, got {:?}", url),
        ))
    }
}

fn parse_positive<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("expected a positive integer, got {:?}", value),
        )),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("expected a boolean, got {:?}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.client_options().timeout_ms, 30_000);
        assert_eq!(config.poll_config().interval_ms, 5_000);
        assert!(config.poll_config().auto_start);
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("RELAY_API_URL", "https://relayer.example.com/"),
            ("RELAY_REQUEST_TIMEOUT_MS", "1500"),
            ("RELAY_POLL_INTERVAL_MS", "2000"),
            ("RELAY_LOG_LEVEL", "debug"),
            ("RELAY_LOG_JSON", "1"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://relayer.example.com/");
        assert_eq!(config.request_timeout_ms, 1_500);
        assert_eq!(config.poll_interval_ms, 2_000);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.log_json);
    }

    #[test]
    fn test_invalid_values() {
        let err = ClientConfig::from_lookup(lookup(&[("RELAY_POLL_INTERVAL_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "RELAY_POLL_INTERVAL_MS"));

        assert!(ClientConfig::from_lookup(lookup(&[("RELAY_API_URL", "localhost:3001")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("RELAY_LOG_JSON", "maybe")])).is_err());
    }

    #[test]
    fn test_flag_overrides_env() {
        let config = ClientConfig::default()
            .with_api_url(Some("http://10.0.0.5:3001".into()))
            .unwrap();
        assert_eq!(config.api_url, "http://10.0.0.5:3001");
        assert!(ClientConfig::default().with_api_url(Some("ftp://x".into())).is_err());
    }
}
