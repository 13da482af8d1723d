use common_env::Config;
use std::time::Duration;

pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantRate {
    pub count_per_sec: u32,
}

/// Start `rate` iterations per `time_unit` for `duration`, regardless of how long each takes.
///
/// Every iteration occupies one worker. `pre_allocated_workers` are available from the start,
/// more are added on demand up to `max_workers`. An iteration that finds no free worker at
/// `max_workers` is dropped. Within a cycle, iterations are started `request_bundle_size` at a
/// time, or more for high rates.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantArrivalRate {
    pub rate: ConstantRate,
    pub time_unit: Duration,
    pub duration: Duration,
    pub pre_allocated_workers: u32,
    pub max_workers: u32,
    pub graceful_stop: Duration,
    pub request_bundle_size: u32,
}

/// Run a fixed number of iterations, `workers` at a time, as fast as possible.
///
/// No iteration starts after `max_duration`.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedIterations {
    pub iterations: u64,
    pub workers: u32,
    pub max_duration: Duration,
    pub graceful_stop: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorSpec {
    ConstantArrivalRate(ConstantArrivalRate),
    SharedIterations(SharedIterations),
}

impl ExecutorSpec {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutorSpec::ConstantArrivalRate(_) => "constant-arrival-rate",
            ExecutorSpec::SharedIterations(_) => "shared-iterations",
        }
    }
}

impl From<&Config> for ExecutorSpec {
    fn from(config: &Config) -> Self {
        match config.iterations {
            Some(iterations) => ExecutorSpec::SharedIterations(SharedIterations {
                iterations,
                workers: config.pre_allocated_workers,
                max_duration: DEFAULT_MAX_DURATION,
                graceful_stop: config.graceful_stop,
            }),
            None => ExecutorSpec::ConstantArrivalRate(ConstantArrivalRate {
                rate: ConstantRate {
                    count_per_sec: config.rate,
                },
                time_unit: DEFAULT_TIME_UNIT,
                duration: config.duration,
                pre_allocated_workers: config.pre_allocated_workers,
                max_workers: config.max_workers,
                graceful_stop: config.graceful_stop,
                request_bundle_size: config.request_bundle_size,
            }),
        }
    }
}
