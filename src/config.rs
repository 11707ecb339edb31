//! Configuration loaded from environment variables at startup.
//!
//! # Variables
//! - `PROJECT_ID`, `ZONE`, `INSTANCE_NAME`: the instance to stop. May be
//!   absent; events that would stop it then report a configuration error.
//! - `SHUTDOWN_THRESHOLD` (1.0), `WARN_THRESHOLD` (0.8), `MAX_OVERRIDE_RATIO` (1.5)
//! - `OVERRIDE_PROJECT_ID`, `OVERRIDE_COLLECTION`, `OVERRIDE_KEY`, `OVERRIDE_TIMEOUT_MS`
//! - `STOP_MAX_ATTEMPTS`, `STOP_BASE_DELAY_SECS`, `STOP_BACKOFF`, `STOP_TIMEOUT_SECS`
//! - `HOST`, `PORT`, `GCP_ACCESS_TOKEN`

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::budget::{Thresholds, DEFAULT_CRITICAL_THRESHOLD, DEFAULT_WARN_THRESHOLD};
use crate::overrides::{DEFAULT_MAX_OVERRIDE_RATIO, DEFAULT_READ_TIMEOUT};
use crate::shutdown::{Backoff, RetryPolicy, ShutdownTarget, DEFAULT_CALL_TIMEOUT};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("WARN_THRESHOLD ({warn}) must not exceed SHUTDOWN_THRESHOLD ({critical})")]
    ThresholdOrder { warn: f64, critical: f64 },
}

/// Target identity as configured; any part may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetConfig {
    pub project_id: Option<String>,
    pub zone: Option<String>,
    pub instance_name: Option<String>,
}

impl TargetConfig {
    /// The complete target, or the names of the missing variables.
    pub fn resolve(&self) -> Result<ShutdownTarget, Vec<&'static str>> {
        match (&self.project_id, &self.zone, &self.instance_name) {
            (Some(p), Some(z), Some(i)) => Ok(ShutdownTarget::new(p, z, i)),
            _ => {
                let mut missing = Vec::new();
                if self.project_id.is_none() {
                    missing.push("PROJECT_ID");
                }
                if self.zone.is_none() {
                    missing.push("ZONE");
                }
                if self.instance_name.is_none() {
                    missing.push("INSTANCE_NAME");
                }
                Err(missing)
            }
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: TargetConfig,
    pub thresholds: Thresholds,
    pub max_override_ratio: f64,
    /// Project hosting the override store; falls back to the target project.
    pub override_project_id: Option<String>,
    pub override_collection: String,
    pub override_key: String,
    pub override_timeout: Duration,
    pub retry: RetryPolicy,
    pub stop_timeout: Duration,
    pub host: String,
    pub port: u16,
    /// Static bearer token for local runs; otherwise the metadata server is used.
    pub access_token: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let target = TargetConfig {
            project_id: get("PROJECT_ID"),
            zone: get("ZONE"),
            instance_name: get("INSTANCE_NAME"),
        };

        let critical = parse_ratio(&get, "SHUTDOWN_THRESHOLD", DEFAULT_CRITICAL_THRESHOLD)?;
        let warn = parse_ratio(&get, "WARN_THRESHOLD", DEFAULT_WARN_THRESHOLD)?;
        if warn > critical {
            return Err(ConfigError::ThresholdOrder { warn, critical });
        }
        let max_override_ratio = parse_ratio(&get, "MAX_OVERRIDE_RATIO", DEFAULT_MAX_OVERRIDE_RATIO)?;

        let max_attempts: u32 = parse_or(&get, "STOP_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "STOP_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        let base_delay_secs: u64 = parse_or(&get, "STOP_BASE_DELAY_SECS", 2)?;
        let backoff: Backoff = parse_or(&get, "STOP_BACKOFF", Backoff::Linear)?;
        let retry = RetryPolicy::new(max_attempts, Duration::from_secs(base_delay_secs))
            .with_backoff(backoff);

        let override_timeout_ms: u64 = parse_or(
            &get,
            "OVERRIDE_TIMEOUT_MS",
            DEFAULT_READ_TIMEOUT.as_millis() as u64,
        )?;
        let stop_timeout_secs: u64 =
            parse_or(&get, "STOP_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT.as_secs())?;

        Ok(Self {
            override_project_id: get("OVERRIDE_PROJECT_ID").or_else(|| target.project_id.clone()),
            target,
            thresholds: Thresholds::new(warn, critical),
            max_override_ratio,
            override_collection: get("OVERRIDE_COLLECTION")
                .unwrap_or_else(|| "budget_overrides".to_string()),
            override_key: get("OVERRIDE_KEY").unwrap_or_else(|| "shutdown".to_string()),
            override_timeout: Duration::from_millis(override_timeout_ms),
            retry,
            stop_timeout: Duration::from_secs(stop_timeout_secs),
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8080)?,
            access_token: get("GCP_ACCESS_TOKEN"),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_ratio<G>(get: &G, key: &'static str, default: f64) -> Result<f64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason,
    };
    let value: f64 = raw.parse().map_err(|e: std::num::ParseFloatError| invalid(e.to_string()))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid("must be a positive finite ratio".to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.thresholds, Thresholds::new(0.8, 1.0));
        assert_eq!(config.max_override_ratio, 1.5);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.override_timeout, Duration::from_secs(5));
        assert_eq!(config.stop_timeout, Duration::from_secs(30));
        assert_eq!(config.port, 8080);
        assert_eq!(config.override_key, "shutdown");
        assert!(config.access_token.is_none());
        assert_eq!(
            config.target.resolve(),
            Err(vec!["PROJECT_ID", "ZONE", "INSTANCE_NAME"])
        );
    }

    #[test]
    fn test_full_target_and_overrides() {
        let config = load(&[
            ("PROJECT_ID", "acme"),
            ("ZONE", "europe-west1-b"),
            ("INSTANCE_NAME", "gpu-box"),
            ("SHUTDOWN_THRESHOLD", "0.95"),
            ("WARN_THRESHOLD", "0.5"),
            ("MAX_OVERRIDE_RATIO", "2.0"),
            ("STOP_BACKOFF", "exponential"),
            ("STOP_MAX_ATTEMPTS", "5"),
        ])
        .unwrap();
        assert_eq!(
            config.target.resolve(),
            Ok(ShutdownTarget::new("acme", "europe-west1-b", "gpu-box"))
        );
        assert_eq!(config.thresholds, Thresholds::new(0.5, 0.95));
        assert_eq!(config.max_override_ratio, 2.0);
        assert_eq!(config.retry.backoff, Backoff::Exponential);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.override_project_id.as_deref(), Some("acme"));
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let config = load(&[("PROJECT_ID", "acme"), ("ZONE", "  "), ("INSTANCE_NAME", "vm")]).unwrap();
        assert_eq!(config.target.resolve(), Err(vec!["ZONE"]));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            load(&[("SHUTDOWN_THRESHOLD", "lots")]),
            Err(ConfigError::Invalid { key: "SHUTDOWN_THRESHOLD", .. })
        ));
        assert!(matches!(
            load(&[("MAX_OVERRIDE_RATIO", "-1")]),
            Err(ConfigError::Invalid { key: "MAX_OVERRIDE_RATIO", .. })
        ));
        assert!(matches!(
            load(&[("STOP_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::Invalid { key: "STOP_MAX_ATTEMPTS", .. })
        ));
        assert!(matches!(
            load(&[("WARN_THRESHOLD", "1.2")]),
            Err(ConfigError::ThresholdOrder { .. })
        ));
    }

    #[test]
    fn test_rejected_ratio_reports_raw_input() {
        let err = tokio_test::assert_err!(load(&[("MAX_OVERRIDE_RATIO", "-1.50")]));
        match err {
            ConfigError::Invalid { key, value, .. } => {
                assert_eq!(key, "MAX_OVERRIDE_RATIO");
                assert_eq!(value, "-1.50");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let err = tokio_test::assert_err!(load(&[("SHUTDOWN_THRESHOLD", "1e999")]));
        assert!(err.to_string().contains("1e999"), "{err}");
        tokio_test::assert_ok!(load(&[("SHUTDOWN_THRESHOLD", "1.0")]));
    }
}
