//! Pass/fail predicates evaluated over aggregated run metrics.
//!
//! Expressions read `<aggregation> <op> <value>`, e.g. `rate<0.01` or `p(95)<250`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const METRIC_HTTP_REQS: &str = "http_reqs";
pub const METRIC_HTTP_REQ_FAILED: &str = "http_req_failed";
pub const METRIC_HTTP_REQ_DURATION: &str = "http_req_duration";
pub const METRIC_CHECKS: &str = "checks";
pub const METRIC_ITERATIONS: &str = "iterations";
pub const METRIC_DROPPED_ITERATIONS: &str = "dropped_iterations";

static EXPR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(rate|count|avg|min|max|med|p\(\s*(\d+(?:\.\d+)?)\s*\))\s*(<=|>=|==|!=|<|>)\s*(-?\d+(?:\.\d+)?)\s*$")
        .expect("threshold pattern is valid")
});

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("invalid threshold expression '{0}'")]
    InvalidExpression(String),
    #[error("percentile must be within [0, 100], found {0}")]
    InvalidPercentile(f64),
    #[error("aggregation '{aggregation}' is not available for {metric}")]
    UnsupportedAggregation { metric: String, aggregation: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }
}

impl FromStr for Comparison {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(Comparison::Lt),
            "<=" => Ok(Comparison::Le),
            ">" => Ok(Comparison::Gt),
            ">=" => Ok(Comparison::Ge),
            "==" => Ok(Comparison::Eq),
            "!=" => Ok(Comparison::Ne),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdExpr {
    pub source: String,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
}

impl FromStr for ThresholdExpr {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ThresholdError::InvalidExpression(s.to_string());
        let captures = EXPR_PATTERN.captures(s).ok_or_else(invalid)?;
        let aggregation = match (captures.get(1).map(|m| m.as_str()), captures.get(2)) {
            (_, Some(p)) => {
                let p = f64::from_str(p.as_str()).map_err(|_| invalid())?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(ThresholdError::InvalidPercentile(p));
                }
                Aggregation::Percentile(p)
            }
            (Some("rate"), _) => Aggregation::Rate,
            (Some("count"), _) => Aggregation::Count,
            (Some("avg"), _) => Aggregation::Avg,
            (Some("min"), _) => Aggregation::Min,
            (Some("max"), _) => Aggregation::Max,
            (Some("med"), _) => Aggregation::Med,
            _ => return Err(invalid()),
        };
        let comparison = captures
            .get(3)
            .and_then(|m| Comparison::from_str(m.as_str()).ok())
            .ok_or_else(invalid)?;
        let value = captures
            .get(4)
            .and_then(|m| f64::from_str(m.as_str()).ok())
            .ok_or_else(invalid)?;
        Ok(ThresholdExpr {
            source: s.trim().to_string(),
            aggregation,
            comparison,
            value,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic count, aggregations: `count`, `rate` (per second)
    Counter,
    /// Share of true values, aggregations: `rate`, `count` (of true values)
    Rate,
    /// Distribution in milliseconds
    Trend,
}

impl MetricKind {
    pub fn of(metric: &str) -> Option<Self> {
        match metric {
            METRIC_HTTP_REQS | METRIC_ITERATIONS | METRIC_DROPPED_ITERATIONS => {
                Some(MetricKind::Counter)
            }
            METRIC_HTTP_REQ_FAILED | METRIC_CHECKS => Some(MetricKind::Rate),
            METRIC_HTTP_REQ_DURATION => Some(MetricKind::Trend),
            _ => None,
        }
    }

    fn supports(&self, aggregation: &Aggregation) -> bool {
        match self {
            MetricKind::Counter | MetricKind::Rate => {
                matches!(aggregation, Aggregation::Count | Aggregation::Rate)
            }
            MetricKind::Trend => !matches!(aggregation, Aggregation::Rate),
        }
    }
}

/// Anything that can answer an aggregation query over a named metric.
pub trait MetricSource {
    /// `None` when the metric has no observations.
    fn aggregate(&self, metric: &str, aggregation: Aggregation) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    pub metric: String,
    pub expr: ThresholdExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThresholdSet {
    thresholds: Vec<Threshold>,
}

impl ThresholdSet {
    /// `http_req_failed: rate<max_error_rate` and `http_req_duration: p(95)<max_p95`.
    pub fn with_defaults(max_error_rate: f64, max_p95: Duration) -> Result<Self, ThresholdError> {
        let mut set = ThresholdSet::default();
        set.add(METRIC_HTTP_REQ_FAILED, &format!("rate<{}", max_error_rate))?;
        set.add(
            METRIC_HTTP_REQ_DURATION,
            &format!("p(95)<{}", max_p95.as_secs_f64() * 1000.0),
        )?;
        Ok(set)
    }

    pub fn add(&mut self, metric: &str, expression: &str) -> Result<(), ThresholdError> {
        let kind =
            MetricKind::of(metric).ok_or_else(|| ThresholdError::UnknownMetric(metric.to_string()))?;
        let expr = ThresholdExpr::from_str(expression)?;
        if !kind.supports(&expr.aggregation) {
            return Err(ThresholdError::UnsupportedAggregation {
                metric: metric.to_string(),
                aggregation: expr.aggregation.to_string(),
            });
        }
        self.thresholds.push(Threshold {
            metric: metric.to_string(),
            expr,
        });
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// A threshold over a metric without observations passes.
    pub fn evaluate(&self, source: &impl MetricSource) -> Vec<ThresholdResult> {
        self.thresholds
            .iter()
            .map(|threshold| {
                let observed = source.aggregate(&threshold.metric, threshold.expr.aggregation);
                let passed = observed.map_or(true, |observed| {
                    threshold.expr.comparison.holds(observed, threshold.expr.value)
                });
                ThresholdResult {
                    metric: threshold.metric.clone(),
                    expression: threshold.expr.source.clone(),
                    observed,
                    passed,
                }
            })
            .collect()
    }
}
