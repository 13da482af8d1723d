#![warn(unused_lifetimes)]
#![forbid(unsafe_code)]

//! Named pass/fail predicates over response status codes.
//!
//! A failed check is an observation, never an error that stops the run: callers record the
//! outcome through a [`CheckSink`] and move on.

use log::trace;
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

pub const CHECK_CREATE_SUCCEEDED: &str = "setup create succeeded (201/200)";
pub const CHECK_REDIRECT_RETURNED: &str = "redirect returned 3xx or 429";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMatcher {
    Code(u16),
    /// Inclusive on both ends
    Range(u16, u16),
}

impl StatusMatcher {
    #[inline]
    pub fn matches(&self, status: u16) -> bool {
        match *self {
            StatusMatcher::Code(code) => code == status,
            StatusMatcher::Range(start, end) => (start..=end).contains(&status),
        }
    }
}

impl Display for StatusMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusMatcher::Code(code) => write!(f, "{}", code),
            StatusMatcher::Range(start, end) => write!(f, "{}..={}", start, end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCheck {
    name: String,
    accepted: Vec<StatusMatcher>,
}

impl StatusCheck {
    pub fn new(name: impl Into<String>, accepted: Vec<StatusMatcher>) -> Self {
        StatusCheck {
            name: name.into(),
            accepted,
        }
    }

    /// Link creation answered with 201 Created or 200 OK
    pub fn created_or_ok() -> Self {
        Self::new(
            CHECK_CREATE_SUCCEEDED,
            vec![StatusMatcher::Code(201), StatusMatcher::Code(200)],
        )
    }

    /// Lookup answered with any redirect, or was rate limited
    pub fn redirect_or_rate_limited() -> Self {
        Self::new(
            CHECK_REDIRECT_RETURNED,
            vec![StatusMatcher::Range(300, 399), StatusMatcher::Code(429)],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.accepted.iter().any(|m| m.matches(status))
    }

    /// `None` stands for a request that got no response at all.
    pub fn assert(&self, status: Option<u16>) -> Result<(), AssertionError> {
        trace!("[StatusCheck] - asserting '{}' on {:?}", &self.name, status);
        match status {
            Some(status) if self.accepts(status) => Ok(()),
            Some(status) => Err(AssertionError::UnexpectedStatus {
                check: self.name.clone(),
                status,
            }),
            None => Err(AssertionError::NoResponse {
                check: self.name.clone(),
            }),
        }
    }

    /// Assert and record the outcome in `sink`.
    pub fn record(
        &self,
        sink: &(impl CheckSink + ?Sized),
        status: Option<u16>,
    ) -> Result<(), AssertionError> {
        let result = self.assert(status);
        sink.record_check(&self.name, result.is_ok());
        result
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssertionError {
    #[error("check '{check}' failed - unexpected status {status}")]
    UnexpectedStatus { check: String, status: u16 },
    #[error("check '{check}' failed - no response")]
    NoResponse { check: String },
}

/// Receives check outcomes for aggregation.
pub trait CheckSink: Send + Sync {
    fn record_check(&self, name: &str, passed: bool);
}

#[cfg(test)]
mod tests {
    use crate::{
        AssertionError, CheckSink, StatusCheck, StatusMatcher, CHECK_CREATE_SUCCEEDED,
        CHECK_REDIRECT_RETURNED,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<(String, bool)>>);

    impl CheckSink for Recorded {
        fn record_check(&self, name: &str, passed: bool) {
            self.0.lock().unwrap().push((name.to_string(), passed));
        }
    }

    #[test]
    fn redirect_or_rate_limited() {
        let check = StatusCheck::redirect_or_rate_limited();
        assert_eq!(check.name(), CHECK_REDIRECT_RETURNED);
        for status in [300, 301, 302, 307, 308, 399, 429] {
            assert!(check.accepts(status), "{} should pass", status);
        }
        for status in [200, 201, 299, 400, 404, 428, 430, 500, 503] {
            assert!(!check.accepts(status), "{} should fail", status);
        }
    }

    #[test]
    fn created_or_ok() {
        let check = StatusCheck::created_or_ok();
        assert_eq!(check.name(), CHECK_CREATE_SUCCEEDED);
        assert!(check.assert(Some(201)).is_ok());
        assert!(check.assert(Some(200)).is_ok());
        assert_eq!(
            check.assert(Some(202)),
            Err(AssertionError::UnexpectedStatus {
                check: CHECK_CREATE_SUCCEEDED.to_string(),
                status: 202
            })
        );
        assert_eq!(
            check.assert(None),
            Err(AssertionError::NoResponse {
                check: CHECK_CREATE_SUCCEEDED.to_string()
            })
        );
    }

    #[test]
    fn record_reports_to_sink() {
        let sink = Recorded::default();
        let check = StatusCheck::redirect_or_rate_limited();
        assert!(check.record(&sink, Some(302)).is_ok());
        assert!(check.record(&sink, Some(404)).is_err());
        assert!(check.record(&sink, None).is_err());
        let recorded = sink.0.into_inner().unwrap();
        assert_eq!(
            recorded
                .iter()
                .map(|(_, passed)| *passed)
                .collect::<Vec<_>>(),
            vec![true, false, false]
        );
    }

    #[test]
    fn custom_check() {
        let check = StatusCheck::new("custom", vec![StatusMatcher::Range(200, 204)]);
        assert!(check.accepts(204));
        assert!(!check.accepts(205));
        assert_eq!(
            check.assert(Some(205)).unwrap_err().to_string(),
            "check 'custom' failed - unexpected status 205"
        );
        assert_eq!(StatusMatcher::Range(300, 399).to_string(), "300..=399");
        assert_eq!(StatusMatcher::Code(429).to_string(), "429");
    }
}
