//! Wire types of the URL shortener API and the executor specs derived from configuration.

mod rate_spec;

pub use rate_spec::{
    ConstantArrivalRate, ConstantRate, ExecutorSpec, SharedIterations, DEFAULT_MAX_DURATION,
    DEFAULT_TIME_UNIT,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::{error, fmt};

pub const PATH_CREATE_LINK: &str = "/api/v1/links";
pub const HEADER_API_KEY: &str = "X-API-Key";
pub const HEADER_RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Destination used for the `seed`-th link created during setup. Distinct per seed.
pub fn seed_url(seed: usize) -> String {
    format!("https://example.com/?seed={}", seed)
}

pub fn create_link_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), PATH_CREATE_LINK)
}

pub fn lookup_url(base_url: &str, code: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), code)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CreateLinkRequest {
    pub url: String,
}

impl CreateLinkRequest {
    pub fn seeded(seed: usize) -> Self {
        CreateLinkRequest {
            url: seed_url(seed),
        }
    }
}

/// Successful response of link creation. Only `code` is required, the rest is informational.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CreatedLink {
    pub code: String,
    #[serde(default)]
    pub short_url: Option<String>,
    #[serde(default)]
    pub long_url: Option<String>,
}

/// Error reported by the target API, normalized from any of the shapes it uses:
/// `{"error": {"code", "message"}}`, `{"code", "message"}`, `{"detail": "..."}` or
/// `{"detail": {...}}`. Anything else gets a code derived from the status.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let default_code = error_code_for_status(status);
        let parsed = serde_json::from_slice::<Value>(body).ok();
        parsed
            .as_ref()
            .and_then(|value| {
                Self::from_code_message(value.get("error"))
                    .or_else(|| Self::from_code_message(Some(value)))
                    .or_else(|| Self::from_code_message(value.get("detail")))
                    .or_else(|| {
                        value
                            .get("detail")
                            .and_then(Value::as_str)
                            .map(|message| ApiError {
                                code: default_code.to_string(),
                                message: message.to_string(),
                            })
                    })
            })
            .unwrap_or_else(|| ApiError {
                code: default_code.to_string(),
                message: "Request failed".to_string(),
            })
    }

    fn from_code_message(value: Option<&Value>) -> Option<Self> {
        let value = value?;
        let code = value.get("code")?;
        let message = value.get("message")?;
        Some(ApiError {
            code: value_to_string(code),
            message: value_to_string(message),
        })
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.code, self.message)
    }
}

impl error::Error for ApiError {}

pub fn error_code_for_status(status: u16) -> &'static str {
    match status {
        400 => "BAD_REQUEST",
        401 => "UNAUTHORIZED",
        403 => "FORBIDDEN",
        404 => "NOT_FOUND",
        409 => "CONFLICT",
        410 => "GONE",
        422 => "VALIDATION_ERROR",
        429 => "RATE_LIMITED",
        500 => "INTERNAL_SERVER_ERROR",
        _ => "ERROR",
    }
}
