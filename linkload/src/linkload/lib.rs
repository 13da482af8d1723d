//! Load test of a URL shortener: provision a pool of short links, then hammer the redirect
//! endpoint with lookups drawn from that pool.

pub mod http_util;
pub mod provisioner;
pub mod scenario;
pub mod workload;

use common_env::ConfigError;
use linkload_metrics::{MetricsError, ThresholdError};
use thiserror::Error;

pub const SCENARIO_NAME: &str = "redirects";

pub const EXIT_THRESHOLDS_FAILED: i32 = 99;
pub const EXIT_INVALID_CONFIG: i32 = 104;
pub const EXIT_SETUP_FAILED: i32 = 107;

/// Fatal failures of a run. Everything recoverable is recorded as a check or metric instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("invalid threshold - {0}")]
    Threshold(#[from] ThresholdError),
    #[error("no short links created out of {requested} attempts")]
    ProvisioningExhausted { requested: usize },
    #[error("failed to encode request body - {0}")]
    Encoding(#[from] serde_json::Error),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Configuration(_) | Error::Threshold(_) => EXIT_INVALID_CONFIG,
            Error::ProvisioningExhausted { .. } => EXIT_SETUP_FAILED,
            Error::Encoding(_) | Error::Metrics(_) => 1,
        }
    }
}

#[macro_export]
macro_rules! log_error {
    ($result:expr) => {
        if let Err(e) = $result {
            use log::error;
            error!("{}", e.to_string());
        }
    };
}


#[cfg(test)]
mod test {
    use crate::{Error, EXIT_INVALID_CONFIG, EXIT_SETUP_FAILED};
    use common_env::ConfigError;

    #[test]
    fn exit_codes() {
        assert_eq!(
            Error::from(ConfigError::Missing("API_KEY")).exit_code(),
            EXIT_INVALID_CONFIG
        );
        let err = Error::ProvisioningExhausted { requested: 200 };
        assert_eq!(err.exit_code(), EXIT_SETUP_FAILED);
        assert_eq!(err.to_string(), "no short links created out of 200 attempts");
        let err = Error::from(serde_json::from_str::<u32>("x").unwrap_err());
        assert_eq!(err.exit_code(), 1);
    }
}
