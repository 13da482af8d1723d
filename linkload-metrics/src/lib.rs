mod stats;
mod summary;
pub mod thresholds;

pub use stats::RunStats;
pub use summary::{CheckSummary, CounterSummary, RateSummary, RunSummary, TrendSummary};
pub use thresholds::{MetricSource, ThresholdError, ThresholdResult, ThresholdSet};

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

/// Buckets of `http_req_duration`, in milliseconds
pub const DEFAULT_HISTOGRAM_BUCKET: [f64; 8] = [
    5f64, 10f64, 25f64, 50f64, 100f64, 250f64, 500f64, 1000f64,
];

pub const RESULT_PASS: &str = "pass";
pub const RESULT_FAIL: &str = "fail";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metrics: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("failed to create latency histogram: {0}")]
    Histogram(String),
    #[error("metrics are not valid utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Prometheus view of a run. Every metric carries the scenario name as a constant label.
pub struct Metrics {
    registry: Registry,
    http_reqs: IntCounterVec,
    http_req_failed: IntCounterVec,
    http_req_duration: HistogramVec,
    checks: IntCounterVec,
    iterations: IntCounter,
    dropped_iterations: IntCounter,
    workers: IntGauge,
}

impl Metrics {
    pub fn new(scenario: &str) -> Result<Self, MetricsError> {
        let registry = Registry::default();

        let opts =
            Opts::new("http_reqs", "requests sent to the target").const_label("scenario", scenario);
        let http_reqs = IntCounterVec::new(opts, &["phase", "status"])?;

        let opts = Opts::new(
            "http_req_failed",
            "requests without a response or with a status outside 200-399",
        )
        .const_label("scenario", scenario);
        let http_req_failed = IntCounterVec::new(opts, &["phase"])?;

        let mut opts = HistogramOpts::new("http_req_duration", "request duration in milliseconds")
            .const_label("scenario", scenario);
        opts.buckets = Vec::from(DEFAULT_HISTOGRAM_BUCKET);
        let http_req_duration = HistogramVec::new(opts, &["phase", "status_class"])?;

        let opts = Opts::new("checks", "check outcomes").const_label("scenario", scenario);
        let checks = IntCounterVec::new(opts, &["check", "result"])?;

        let opts =
            Opts::new("iterations", "completed iterations").const_label("scenario", scenario);
        let iterations = IntCounter::with_opts(opts)?;

        let opts = Opts::new(
            "dropped_iterations",
            "iterations not started for lack of a free worker",
        )
        .const_label("scenario", scenario);
        let dropped_iterations = IntCounter::with_opts(opts)?;

        let opts = Opts::new("workers", "allocated workers").const_label("scenario", scenario);
        let workers = IntGauge::with_opts(opts)?;

        registry.register(Box::new(http_reqs.clone()))?;
        registry.register(Box::new(http_req_failed.clone()))?;
        registry.register(Box::new(http_req_duration.clone()))?;
        registry.register(Box::new(checks.clone()))?;
        registry.register(Box::new(iterations.clone()))?;
        registry.register(Box::new(dropped_iterations.clone()))?;
        registry.register(Box::new(workers.clone()))?;

        Ok(Metrics {
            registry,
            http_reqs,
            http_req_failed,
            http_req_duration,
            checks,
            iterations,
            dropped_iterations,
            workers,
        })
    }

    pub fn http_request(&self, phase: &str, status: &str, status_class: &str, elapsed_ms: f64) {
        self.http_reqs.with_label_values(&[phase, status]).inc();
        self.http_req_duration
            .with_label_values(&[phase, status_class])
            .observe(elapsed_ms);
    }

    pub fn http_request_failed(&self, phase: &str) {
        self.http_req_failed.with_label_values(&[phase]).inc();
    }

    pub fn check(&self, name: &str, passed: bool) {
        let result = if passed { RESULT_PASS } else { RESULT_FAIL };
        self.checks.with_label_values(&[name, result]).inc();
    }

    pub fn check_count(&self, name: &str, passed: bool) -> u64 {
        let result = if passed { RESULT_PASS } else { RESULT_FAIL };
        self.checks.with_label_values(&[name, result]).get()
    }

    pub fn iteration(&self) {
        self.iterations.inc();
    }

    pub fn dropped_iterations(&self, count: u64) {
        self.dropped_iterations.inc_by(count);
    }

    pub fn set_workers(&self, count: i64) {
        self.workers.set(count);
    }

    pub fn iteration_count(&self) -> u64 {
        self.iterations.get()
    }

    pub fn dropped_iteration_count(&self) -> u64 {
        self.dropped_iterations.get()
    }

    pub fn worker_count(&self) -> i64 {
        self.workers.get()
    }

    /// Prometheus text exposition of everything recorded so far
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
