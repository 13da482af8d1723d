use crate::thresholds::ThresholdResult;
use serde::Serialize;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CounterSummary {
    pub count: u64,
    /// per second over the whole run
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateSummary {
    pub rate: f64,
    pub hits: u64,
    pub total: u64,
}

impl RateSummary {
    pub fn new(hits: u64, total: u64) -> Self {
        let rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        RateSummary { rate, hits, total }
    }
}

/// Latency distribution, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendSummary {
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// End of run report, printed to stdout and optionally exported as json.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub scenario: String,
    pub executor: String,
    pub elapsed_secs: f64,
    pub checks: Vec<CheckSummary>,
    pub checks_total: RateSummary,
    pub http_reqs: CounterSummary,
    pub http_req_failed: RateSummary,
    pub http_req_duration: TrendSummary,
    pub iterations: CounterSummary,
    pub dropped_iterations: CounterSummary,
    pub thresholds: Vec<ThresholdResult>,
}

impl RunSummary {
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }
}

fn mark(passed: bool) -> char {
    if passed {
        '✓'
    } else {
        '✗'
    }
}

fn ms(value: f64) -> String {
    if value >= 1000.0 {
        format!("{:.2}s", value / 1000.0)
    } else {
        format!("{:.2}ms", value)
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "  scenario: {} ({}), {:.1}s",
            self.scenario, self.executor, self.elapsed_secs
        )?;
        writeln!(f)?;
        for check in &self.checks {
            writeln!(f, "  {} {}", mark(check.fails == 0), check.name)?;
            if check.fails > 0 {
                let total = check.passes + check.fails;
                writeln!(
                    f,
                    "    ↳  {:.0}% - ✓ {} / ✗ {}",
                    check.passes as f64 * 100.0 / total as f64,
                    check.passes,
                    check.fails
                )?;
            }
        }
        if !self.checks.is_empty() {
            writeln!(f)?;
        }

        let threshold_mark = |metric: &str| -> String {
            let mut results = self.thresholds.iter().filter(|t| t.metric == metric).peekable();
            if results.peek().is_none() {
                return " ".to_string();
            }
            mark(results.all(|t| t.passed)).to_string()
        };

        writeln!(
            f,
            "  {} {:.<28}: {:.2}% ✓ {} ✗ {}",
            threshold_mark("checks"),
            "checks",
            self.checks_total.rate * 100.0,
            self.checks_total.hits,
            self.checks_total.total - self.checks_total.hits
        )?;
        writeln!(
            f,
            "  {} {:.<28}: {} {:.2}/s",
            threshold_mark("dropped_iterations"),
            "dropped_iterations",
            self.dropped_iterations.count,
            self.dropped_iterations.rate
        )?;
        let trend = &self.http_req_duration;
        writeln!(
            f,
            "  {} {:.<28}: avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={}",
            threshold_mark("http_req_duration"),
            "http_req_duration",
            ms(trend.avg),
            ms(trend.min),
            ms(trend.med),
            ms(trend.max),
            ms(trend.p90),
            ms(trend.p95),
            ms(trend.p99)
        )?;
        writeln!(
            f,
            "  {} {:.<28}: {:.2}% ✓ {} ✗ {}",
            threshold_mark("http_req_failed"),
            "http_req_failed",
            self.http_req_failed.rate * 100.0,
            self.http_req_failed.hits,
            self.http_req_failed.total - self.http_req_failed.hits
        )?;
        writeln!(
            f,
            "  {} {:.<28}: {} {:.2}/s",
            threshold_mark("http_reqs"),
            "http_reqs",
            self.http_reqs.count,
            self.http_reqs.rate
        )?;
        writeln!(
            f,
            "  {} {:.<28}: {} {:.2}/s",
            threshold_mark("iterations"),
            "iterations",
            self.iterations.count,
            self.iterations.rate
        )?;

        if !self.thresholds.is_empty() {
            writeln!(f)?;
            writeln!(f, "  thresholds:")?;
            for threshold in &self.thresholds {
                let observed = threshold
                    .observed
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "no data".to_string());
                writeln!(
                    f,
                    "  {} {} {} (observed: {})",
                    mark(threshold.passed),
                    threshold.metric,
                    threshold.expression,
                    observed
                )?;
            }
        }
        Ok(())
    }
}
