//! Define common types uses by various components of linkload

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Statuses that count as a successful request. Whether the status is the one a component
/// wanted is a separate question, answered by its checks.
pub const EXPECTED_STATUSES: RangeInclusive<u16> = 200..=399;

/// Which part of the run issued a request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Setup,
    Iteration,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Iteration => "iteration",
        }
    }
}

/// Coarse grouping of HTTP status codes, used as a low-cardinality metric label.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    /// No response was received, e.g. connection refused or timed out
    NoResponse,
}

impl StatusClass {
    pub fn of(status: Option<u16>) -> Self {
        match status {
            Some(100..=199) => StatusClass::Informational,
            Some(200..=299) => StatusClass::Success,
            Some(300..=399) => StatusClass::Redirection,
            Some(400..=499) => StatusClass::ClientError,
            Some(_) => StatusClass::ServerError,
            None => StatusClass::NoResponse,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StatusClass::Informational => "1xx",
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
            StatusClass::NoResponse => "none",
        }
    }
}

impl Display for StatusClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of a single HTTP request, handed to the metrics sink.
///
/// `expected` is false for a request that got no response or a status outside
/// [`EXPECTED_STATUSES`], so a rate limited lookup is a failed request even though its check
/// passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSample {
    pub phase: Phase,
    pub status: Option<u16>,
    pub latency: Duration,
    pub expected: bool,
}

impl ResponseSample {
    pub fn new(phase: Phase, status: Option<u16>, latency: Duration) -> Self {
        ResponseSample {
            phase,
            status,
            latency,
            expected: status.map_or(false, |s| EXPECTED_STATUSES.contains(&s)),
        }
    }

    pub fn status_class(&self) -> StatusClass {
        StatusClass::of(self.status)
    }

    /// Label used for per-status metrics; transport failures are reported as `"none"`.
    pub fn status_label(&self) -> String {
        self.status
            .map(|s| s.to_string())
            .unwrap_or_else(|| StatusClass::NoResponse.label().to_string())
    }
}
