//! Adapter settings: defaults plus environment overrides.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::debug;

use crate::retry::RetryPolicy;
use crate::transport::DEFAULT_REQUEST_TIMEOUT;

pub const ENV_REQUEST_TIMEOUT: &str = "RPC_ADAPTER_REQUEST_TIMEOUT";
pub const ENV_MAX_RETRY: &str = "RPC_ADAPTER_MAX_RETRY";
pub const ENV_BACKOFF: &str = "RPC_ADAPTER_BACKOFF";

/// Settings for handle creation and for the calls made through handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Timeout of each network attempt.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl AdapterConfig {
    /// Builds a config from the defaults and the `RPC_ADAPTER_*` variables
    /// returned by `lookup`.
    pub fn from_env<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT) {
            config.request_timeout = parse_secs(&value).context(ENV_REQUEST_TIMEOUT)?;
        }
        if let Some(value) = lookup(ENV_MAX_RETRY) {
            config.retry.max_retry_duration = parse_secs(&value).context(ENV_MAX_RETRY)?;
        }
        if let Some(value) = lookup(ENV_BACKOFF) {
            config.retry.backoff_delay = parse_secs(&value).context(ENV_BACKOFF)?;
        }

        debug!("Adapter config: {:?}", config);
        Ok(config)
    }
}

/// Parses a positive number of seconds, fractions allowed (`"0.5"`).
pub fn parse_secs(value: &str) -> Result<Duration> {
    let secs: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid number of seconds: {:?}", value))?;

    if !secs.is_finite() || secs <= 0.0 {
        bail!("Duration must be a positive number of seconds, got {:?}", value);
    }

    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("Duration out of range: {:?}", value))
}
