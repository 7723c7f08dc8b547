// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Loaded from an optional YAML file, then overridden by `SVCGRAPH_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::error::{FlowError, Result};
use crate::workflow::task::{Backoff, RetryPolicy};

/// Engine-wide settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for a whole run; `None` disables the timeout watcher
    pub run_timeout_secs: Option<f64>,
    /// Sleep between busy-poll rounds that made no progress
    pub poll_interval_ms: u64,
    /// Retry policy for services that don't declare one
    pub default_max_retries: u32,
    pub default_timeout_secs: f64,
    pub default_backoff: Backoff,
    /// Client-level timeout for remote calls
    pub http_timeout_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: None,
            poll_interval_ms: 10,
            default_max_retries: 0,
            default_timeout_secs: 30.0,
            default_backoff: Backoff::Constant,
            http_timeout_secs: 60.0,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SVCGRAPH_*` environment overrides
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(v) = env_var("SVCGRAPH_RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = Some(parse_env("SVCGRAPH_RUN_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = env_var("SVCGRAPH_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_env("SVCGRAPH_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = env_var("SVCGRAPH_MAX_RETRIES") {
            self.default_max_retries = parse_env("SVCGRAPH_MAX_RETRIES", &v)?;
        }
        if let Some(v) = env_var("SVCGRAPH_TIMEOUT_SECS") {
            self.default_timeout_secs = parse_env("SVCGRAPH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = env_var("SVCGRAPH_BACKOFF") {
            self.default_backoff = match v.to_lowercase().as_str() {
                "constant" => Backoff::Constant,
                "exponential" => Backoff::Exponential,
                other => {
                    return Err(FlowError::config(format!(
                        "SVCGRAPH_BACKOFF must be constant or exponential, got '{}'",
                        other
                    )))
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        seconds("default_timeout_secs", self.default_timeout_secs)?;
        seconds("http_timeout_secs", self.http_timeout_secs)?;
        if let Some(t) = self.run_timeout_secs {
            seconds("run_timeout_secs", t)?;
        }
        Ok(())
    }

    /// Retry policy applied when a service declares none
    pub fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.default_max_retries,
            timeout_secs: self.default_timeout_secs,
            backoff: self.default_backoff,
        }
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs
            .map(|t| Duration::try_from_secs_f64(t).unwrap_or(Duration::MAX))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.http_timeout_secs).unwrap_or(Duration::MAX)
    }
}

/// A non-zero duration that fits in `Duration`
pub(crate) fn seconds(name: &str, secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(FlowError::config(format!(
            "{} must be a positive number of seconds, got {}",
            name, secs
        ))),
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| FlowError::config(format!("Invalid value for {}: '{}'", name, value)))
}
