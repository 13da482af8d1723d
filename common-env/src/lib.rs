//! Common environment variables uses by various components
//!
//! Everything a run needs is resolved once into an immutable [`Config`] before any request is
//! sent. Unset and empty variables fall back to their defaults; malformed values are rejected.

use log::{debug, warn};
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::fmt::Debug;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_NAME_BASE_URL: &str = "BASE_URL";
pub const ENV_NAME_API_KEY: &str = "API_KEY";
pub const ENV_NAME_RATE: &str = "RATE";
pub const ENV_NAME_DURATION: &str = "DURATION";
pub const ENV_NAME_VUS: &str = "VUS";
pub const ENV_NAME_MAX_VUS: &str = "MAX_VUS";
pub const ENV_NAME_NUM_LINKS: &str = "NUM_LINKS";
pub const ENV_NAME_MAX_ERROR_RATE: &str = "MAX_ERROR_RATE";
pub const ENV_NAME_MAX_P95: &str = "MAX_P95";
pub const ENV_NAME_ITERATIONS: &str = "ITERATIONS";
pub const ENV_NAME_ITERATION_PAUSE: &str = "ITERATION_PAUSE";
pub const ENV_NAME_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
pub const ENV_NAME_GRACEFUL_STOP: &str = "GRACEFUL_STOP";
pub const ENV_NAME_SUMMARY_EXPORT: &str = "SUMMARY_EXPORT";
pub const ENV_NAME_METRICS_EXPORT: &str = "METRICS_EXPORT";

pub const DEFAULT_BASE_URL: &str = "http://api:8000";
pub const DEFAULT_RATE: u32 = 500;
pub const DEFAULT_DURATION: Duration = Duration::from_secs(120);
pub const DEFAULT_VUS: u32 = 100;
pub const DEFAULT_MAX_VUS: u32 = 500;
pub const DEFAULT_NUM_LINKS: usize = 200;
pub const DEFAULT_MAX_ERROR_RATE: f64 = 0.01;
pub const DEFAULT_MAX_P95: Duration = Duration::from_millis(250);
pub const DEFAULT_ITERATION_PAUSE: Duration = Duration::from_millis(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

pub const ENV_NAME_BUNDLE_SIZE: &str = "REQUEST_BUNDLE_SIZE";
pub const DEFAULT_REQUEST_BUNDLE_SIZE: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing {0} env var")]
    Missing(&'static str),
    #[error("Invalid value for {name}: '{value}', {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Run configuration, immutable once built.
#[derive(Debug)]
pub struct Config {
    /// Target API, without trailing slash
    pub base_url: String,
    pub api_key: Option<SecretString>,
    /// Iterations started per second
    pub rate: u32,
    pub duration: Duration,
    pub pre_allocated_workers: u32,
    pub max_workers: u32,
    /// Number of short links to create during setup
    pub pool_size: usize,
    pub max_error_rate: f64,
    pub max_p95: Duration,
    /// Run exactly this many iterations instead of pacing by `rate`
    pub iterations: Option<u64>,
    pub iteration_pause: Duration,
    pub request_timeout: Duration,
    pub graceful_stop: Duration,
    /// Max number of iterations dispatched together within a pacing cycle
    pub request_bundle_size: u32,
    pub summary_export: Option<PathBuf>,
    pub metrics_export: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            rate: DEFAULT_RATE,
            duration: DEFAULT_DURATION,
            pre_allocated_workers: DEFAULT_VUS,
            max_workers: DEFAULT_MAX_VUS,
            pool_size: DEFAULT_NUM_LINKS,
            max_error_rate: DEFAULT_MAX_ERROR_RATE,
            max_p95: DEFAULT_MAX_P95,
            iterations: None,
            iteration_pause: DEFAULT_ITERATION_PAUSE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            request_bundle_size: DEFAULT_REQUEST_BUNDLE_SIZE,
            summary_export: None,
            metrics_export: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any `name -> value` source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let base_url = match get(ENV_NAME_BASE_URL) {
            Some(url) => normalize_base_url(&url)?,
            None => DEFAULT_BASE_URL.to_string(),
        };
        let rate = parse_or(&get, ENV_NAME_RATE, DEFAULT_RATE)?;
        if rate == 0 {
            return Err(ConfigError::invalid(ENV_NAME_RATE, "0", "must be at least 1"));
        }
        let duration = duration_or(&get, ENV_NAME_DURATION, DEFAULT_DURATION)?;
        if duration.is_zero() {
            return Err(ConfigError::invalid(
                ENV_NAME_DURATION,
                "0",
                "must be longer than zero",
            ));
        }
        let pre_allocated_workers = parse_or(&get, ENV_NAME_VUS, DEFAULT_VUS)?;
        if pre_allocated_workers == 0 {
            return Err(ConfigError::invalid(ENV_NAME_VUS, "0", "must be at least 1"));
        }
        let mut max_workers = parse_or(&get, ENV_NAME_MAX_VUS, DEFAULT_MAX_VUS)?;
        if max_workers < pre_allocated_workers {
            warn!(
                "[Config] - {}({}) is lower than {}({}), using {}",
                ENV_NAME_MAX_VUS,
                max_workers,
                ENV_NAME_VUS,
                pre_allocated_workers,
                pre_allocated_workers
            );
            max_workers = pre_allocated_workers;
        }
        let max_error_rate = parse_or(&get, ENV_NAME_MAX_ERROR_RATE, DEFAULT_MAX_ERROR_RATE)?;
        if !(0.0..=1.0).contains(&max_error_rate) {
            return Err(ConfigError::invalid(
                ENV_NAME_MAX_ERROR_RATE,
                &max_error_rate.to_string(),
                "must be within [0, 1]",
            ));
        }
        let iterations = match get(ENV_NAME_ITERATIONS) {
            Some(value) => Some(
                u64::from_str(value.trim())
                    .map_err(|e| ConfigError::invalid(ENV_NAME_ITERATIONS, &value, e))?,
            ),
            None => None,
        };
        let request_bundle_size =
            parse_or(&get, ENV_NAME_BUNDLE_SIZE, DEFAULT_REQUEST_BUNDLE_SIZE)?;
        if request_bundle_size == 0 {
            return Err(ConfigError::invalid(
                ENV_NAME_BUNDLE_SIZE,
                "0",
                "must be at least 1",
            ));
        }

        let config = Config {
            base_url,
            api_key: get(ENV_NAME_API_KEY).map(SecretString::from),
            rate,
            duration,
            pre_allocated_workers,
            max_workers,
            pool_size: parse_or(&get, ENV_NAME_NUM_LINKS, DEFAULT_NUM_LINKS)?,
            max_error_rate,
            max_p95: duration_or(&get, ENV_NAME_MAX_P95, DEFAULT_MAX_P95)?,
            iterations,
            iteration_pause: duration_or(&get, ENV_NAME_ITERATION_PAUSE, DEFAULT_ITERATION_PAUSE)?,
            request_timeout: duration_or(&get, ENV_NAME_REQUEST_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)?,
            graceful_stop: duration_or(&get, ENV_NAME_GRACEFUL_STOP, DEFAULT_GRACEFUL_STOP)?,
            request_bundle_size,
            summary_export: get(ENV_NAME_SUMMARY_EXPORT).map(PathBuf::from),
            metrics_export: get(ENV_NAME_METRICS_EXPORT).map(PathBuf::from),
        };
        debug!("[Config] - resolved: {:?}", &config);
        Ok(config)
    }

    /// The API key, required before any link can be created.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or(ConfigError::Missing(ENV_NAME_API_KEY))
    }
}

fn normalize_base_url(value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    let url = Url::parse(trimmed).map_err(|e| ConfigError::invalid(ENV_NAME_BASE_URL, value, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            ENV_NAME_BASE_URL,
            value,
            "scheme must be http or https",
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn parse_or<G, T>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Debug,
{
    match get(name) {
        None => Ok(default),
        Some(value) => T::from_str(value.trim())
            .map_err(|e| ConfigError::invalid(name, &value, format!("{:?}", e))),
    }
}

fn duration_or<G>(get: &G, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => {
            humantime::parse_duration(value.trim()).map_err(|e| ConfigError::invalid(name, &value, e))
        }
    }
}
