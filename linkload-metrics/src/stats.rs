use crate::summary::{CheckSummary, CounterSummary, RateSummary, RunSummary, TrendSummary};
use crate::thresholds::{
    Aggregation, MetricSource, ThresholdSet, METRIC_CHECKS, METRIC_DROPPED_ITERATIONS,
    METRIC_HTTP_REQS, METRIC_HTTP_REQ_DURATION, METRIC_HTTP_REQ_FAILED, METRIC_ITERATIONS,
};
use crate::{Metrics, MetricsError};
use common_types::ResponseSample;
use hdrhistogram::Histogram;
use log::trace;
use parking_lot::{Mutex, RwLock};
use response_assert::CheckSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// latency is tracked in microseconds, up to an hour
const LATENCY_LOWEST: u64 = 1;
const LATENCY_HIGHEST: u64 = 3_600_000_000;
const LATENCY_SIGNIFICANT_DIGITS: u8 = 3;

/// Aggregates everything a run observes: request samples, checks and iterations.
///
/// Safe to share between concurrently running iterations.
pub struct RunStats {
    scenario: String,
    metrics: Metrics,
    latency: Mutex<Histogram<u64>>,
    requests: AtomicU64,
    failed_requests: AtomicU64,
    check_names: RwLock<Vec<String>>,
    started: Instant,
}

impl RunStats {
    pub fn new(scenario: &str) -> Result<Self, MetricsError> {
        let latency =
            Histogram::new_with_bounds(LATENCY_LOWEST, LATENCY_HIGHEST, LATENCY_SIGNIFICANT_DIGITS)
                .map_err(|e| MetricsError::Histogram(format!("{:?}", e)))?;
        Ok(RunStats {
            scenario: scenario.to_string(),
            metrics: Metrics::new(scenario)?,
            latency: Mutex::new(latency),
            requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            check_names: RwLock::new(Vec::new()),
            started: Instant::now(),
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record_request(&self, sample: &ResponseSample) {
        let phase = sample.phase.as_str();
        let elapsed_ms = sample.latency.as_secs_f64() * 1000.0;
        trace!(
            "[RunStats] - {} request, status: {:?}, elapsed: {}ms, expected: {}",
            phase,
            sample.status,
            elapsed_ms,
            sample.expected
        );
        self.metrics.http_request(
            phase,
            &sample.status_label(),
            sample.status_class().label(),
            elapsed_ms,
        );
        self.latency
            .lock()
            .saturating_record(sample.latency.as_micros().max(1) as u64);
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !sample.expected {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            self.metrics.http_request_failed(phase);
        }
    }

    pub fn record_iteration(&self) {
        self.metrics.iteration();
    }

    pub fn record_dropped_iterations(&self, count: u64) {
        self.metrics.dropped_iterations(count);
    }

    pub fn record_workers(&self, count: u32) {
        self.metrics.set_workers(count as i64);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn failed_request_count(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// (passes, fails) of a check, zero for an unknown name
    pub fn check_counts(&self, name: &str) -> (u64, u64) {
        if !self.check_names.read().iter().any(|n| n == name) {
            return (0, 0);
        }
        (
            self.metrics.check_count(name, true),
            self.metrics.check_count(name, false),
        )
    }

    fn checks(&self) -> Vec<CheckSummary> {
        self.check_names
            .read()
            .iter()
            .map(|name| CheckSummary {
                name: name.clone(),
                passes: self.metrics.check_count(name, true),
                fails: self.metrics.check_count(name, false),
            })
            .collect()
    }

    fn latency_ms(&self, aggregation: Aggregation) -> Option<f64> {
        let histogram = self.latency.lock();
        if histogram.is_empty() {
            return None;
        }
        let micros = match aggregation {
            Aggregation::Count => return Some(histogram.len() as f64),
            Aggregation::Rate => return None,
            Aggregation::Avg => histogram.mean(),
            Aggregation::Min => histogram.min() as f64,
            Aggregation::Max => histogram.max() as f64,
            Aggregation::Med => histogram.value_at_quantile(0.5) as f64,
            Aggregation::Percentile(p) => histogram.value_at_quantile(p / 100.0) as f64,
        };
        Some(micros / 1000.0)
    }

    fn per_second(&self, count: u64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            count as f64 / secs
        } else {
            0.0
        }
    }

    /// Snapshot of the run with `thresholds` evaluated against it.
    pub fn summarize(&self, executor: &str, thresholds: &ThresholdSet) -> RunSummary {
        let elapsed = self.elapsed();
        let checks = self.checks();
        let (passes, total) = checks.iter().fold((0, 0), |(passes, total), check| {
            (passes + check.passes, total + check.passes + check.fails)
        });
        let requests = self.request_count();
        let iterations = self.metrics.iteration_count();
        let dropped = self.metrics.dropped_iteration_count();
        let trend = |aggregation| self.latency_ms(aggregation).unwrap_or_default();
        RunSummary {
            scenario: self.scenario.clone(),
            executor: executor.to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
            checks_total: RateSummary::new(passes, total),
            checks,
            http_reqs: CounterSummary {
                count: requests,
                rate: self.per_second(requests, elapsed),
            },
            http_req_failed: RateSummary::new(self.failed_request_count(), requests),
            http_req_duration: TrendSummary {
                avg: trend(Aggregation::Avg),
                min: trend(Aggregation::Min),
                med: trend(Aggregation::Med),
                max: trend(Aggregation::Max),
                p90: trend(Aggregation::Percentile(90.0)),
                p95: trend(Aggregation::Percentile(95.0)),
                p99: trend(Aggregation::Percentile(99.0)),
            },
            iterations: CounterSummary {
                count: iterations,
                rate: self.per_second(iterations, elapsed),
            },
            dropped_iterations: CounterSummary {
                count: dropped,
                rate: self.per_second(dropped, elapsed),
            },
            thresholds: thresholds.evaluate(self),
        }
    }
}

impl CheckSink for RunStats {
    fn record_check(&self, name: &str, passed: bool) {
        if !self.check_names.read().iter().any(|n| n == name) {
            let mut names = self.check_names.write();
            //re-check, another iteration may have registered it meanwhile
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        self.metrics.check(name, passed);
    }
}

impl MetricSource for RunStats {
    fn aggregate(&self, metric: &str, aggregation: Aggregation) -> Option<f64> {
        let ratio = |hits: u64, total: u64| {
            if total == 0 {
                None
            } else {
                Some(hits as f64 / total as f64)
            }
        };
        let counter = |count: u64| match aggregation {
            Aggregation::Count => Some(count as f64),
            Aggregation::Rate => Some(self.per_second(count, self.elapsed())),
            _ => None,
        };
        match metric {
            METRIC_HTTP_REQS => counter(self.request_count()),
            METRIC_ITERATIONS => counter(self.metrics.iteration_count()),
            METRIC_DROPPED_ITERATIONS => counter(self.metrics.dropped_iteration_count()),
            METRIC_HTTP_REQ_FAILED => {
                let failed = self.failed_request_count();
                match aggregation {
                    Aggregation::Rate => ratio(failed, self.request_count()),
                    Aggregation::Count => Some(failed as f64),
                    _ => None,
                }
            }
            METRIC_CHECKS => {
                let (passes, total) = self.checks().iter().fold((0, 0), |(p, t), c| {
                    (p + c.passes, t + c.passes + c.fails)
                });
                match aggregation {
                    Aggregation::Rate => ratio(passes, total),
                    Aggregation::Count => Some(passes as f64),
                    _ => None,
                }
            }
            METRIC_HTTP_REQ_DURATION => self.latency_ms(aggregation),
            _ => None,
        }
    }
}
