use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_core::Stream;
use log::{info, trace};
use tokio::sync::OwnedSemaphorePermit;

use linkload_http::{ConstantArrivalRate, ExecutorSpec};
use linkload_metrics::RunStats;

use crate::rate_spec::scaled;
pub use crate::rate_spec::RateScheme;

mod arrival_rate;
mod rate_spec;
mod shared_iterations;

/// Smallest cycle the arrival generator works with.
pub const MIN_TIME_UNIT: Duration = Duration::from_millis(1);

/// A unit of work the runner starts many times, concurrently.
#[async_trait]
pub trait Iteration: Send + Sync {
    /// `nth` is the zero based sequence number of this start.
    async fn run(&self, nth: u64);
}

/// What an executor did, independent of what the iterations observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub started: u64,
    pub completed: u64,
    pub dropped: u64,
    pub workers_allocated: u32,
    pub elapsed: Duration,
    pub graceful_stop_expired: bool,
}

/// The load-generation engine.
///
/// Setup must complete before iterations start; callers enforce it by awaiting
/// [`Runner::run_setup_once`] before calling [`Runner::run_iterations_concurrently`].
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run_setup_once<F, T>(&self, setup: F) -> T
    where
        F: Future<Output = T> + Send,
        T: Send;

    async fn run_iterations_concurrently<I>(
        &self,
        iteration: Arc<I>,
        spec: &ExecutorSpec,
    ) -> ExecutionReport
    where
        I: Iteration + 'static;
}

/// [`Runner`] on top of the tokio runtime. Iterations are tokio tasks, never more of them in
/// flight than the executor has workers.
pub struct TokioRunner {
    stats: Arc<RunStats>,
}

impl TokioRunner {
    pub fn new(stats: Arc<RunStats>) -> Self {
        TokioRunner { stats }
    }
}

#[async_trait]
impl Runner for TokioRunner {
    async fn run_setup_once<F, T>(&self, setup: F) -> T
    where
        F: Future<Output = T> + Send,
        T: Send,
    {
        let start = Instant::now();
        info!("[run_setup_once] - running setup");
        let result = setup.await;
        info!(
            "[run_setup_once] - setup finished in {}ms",
            start.elapsed().as_millis()
        );
        result
    }

    async fn run_iterations_concurrently<I>(
        &self,
        iteration: Arc<I>,
        spec: &ExecutorSpec,
    ) -> ExecutionReport
    where
        I: Iteration + 'static,
    {
        info!("[run_iterations_concurrently] - executor: {}", spec.name());
        let report = match spec {
            ExecutorSpec::ConstantArrivalRate(spec) => {
                arrival_rate::run(iteration, spec, self.stats.clone()).await
            }
            ExecutorSpec::SharedIterations(spec) => {
                shared_iterations::run(iteration, spec, self.stats.clone()).await
            }
        };
        info!(
            "[run_iterations_concurrently] - started: {}, completed: {}, dropped: {}, workers: {}, elapsed: {:?}",
            report.started,
            report.completed,
            report.dropped,
            report.workers_allocated,
            report.elapsed
        );
        report
    }
}

/// One cycle of an arrival-rate run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cycle {
    pub nth: u32,
    pub iterations: u32,
    pub length: Duration,
}

/// Based on the rate scheme, yields how many iterations to start in each cycle.
///
/// A trailing partial cycle gets a proportionally scaled count.
#[must_use = "streams do nothing unless polled"]
pub struct ArrivalGenerator {
    time_unit: Duration,
    // number of full cycles
    full_cycles: u32,
    // share of a time unit covered by the last cycle, 0 if there's none
    last_fraction: f64,
    current_count: u32,
    last_rate: Option<u32>,
    rate_scheme: Box<dyn RateScheme + Send>,
}

impl ArrivalGenerator {
    pub fn new(
        duration: Duration,
        time_unit: Duration,
        rate_scheme: Box<dyn RateScheme + Send>,
    ) -> Self {
        let time_unit = time_unit.max(MIN_TIME_UNIT);
        let cycles = duration.as_secs_f64() / time_unit.as_secs_f64();
        let full_cycles = cycles.floor() as u32;
        let mut last_fraction = cycles - full_cycles as f64;
        if last_fraction < 1e-6 {
            last_fraction = 0.0;
        }
        ArrivalGenerator {
            time_unit,
            full_cycles,
            last_fraction,
            current_count: 0,
            last_rate: None,
            rate_scheme,
        }
    }

    pub fn total_cycles(&self) -> u32 {
        if self.last_fraction > 0.0 {
            self.full_cycles + 1
        } else {
            self.full_cycles
        }
    }
}

impl From<&ConstantArrivalRate> for ArrivalGenerator {
    fn from(spec: &ConstantArrivalRate) -> Self {
        ArrivalGenerator::new(spec.duration, spec.time_unit, Box::new(spec.rate))
    }
}

impl Stream for ArrivalGenerator {
    type Item = Cycle;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.current_count >= self.total_cycles() {
            trace!("finished generating cycles");
            return Poll::Ready(None);
        }
        let nth = self.current_count;
        let last_rate = self.last_rate;
        let rate = self.rate_scheme.next(nth, last_rate);
        self.last_rate = Some(rate);
        self.current_count += 1;
        let cycle = if nth < self.full_cycles {
            Cycle {
                nth,
                iterations: rate,
                length: self.time_unit,
            }
        } else {
            Cycle {
                nth,
                iterations: scaled(rate, self.last_fraction),
                length: self.time_unit.mul_f64(self.last_fraction),
            }
        };
        Poll::Ready(Some(cycle))
    }
}

/// Runs one iteration on its own task; the worker is released when it finishes.
pub(crate) fn spawn_iteration<I>(
    iteration: &Arc<I>,
    nth: u64,
    permit: OwnedSemaphorePermit,
    stats: &Arc<RunStats>,
    completed: &Arc<AtomicU64>,
) where
    I: Iteration + 'static,
{
    let iteration = iteration.clone();
    let stats = stats.clone();
    let completed = completed.clone();
    tokio::spawn(async move {
        trace!("[spawn_iteration] - iteration {} - begin", nth);
        iteration.run(nth).await;
        stats.record_iteration();
        completed.fetch_add(1, Ordering::Relaxed);
        drop(permit);
    });
}

#[cfg(test)]
mod test_common {
    use crate::Iteration;
    use async_trait::async_trait;
    use env_logger::Env;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Once;
    use std::time::Duration;

    static INIT: Once = Once::new();

    #[allow(dead_code)]
    pub fn init() {
        INIT.call_once(|| {
            let _ = env_logger::Builder::from_env(Env::default().default_filter_or("debug"))
                .format_timestamp_millis()
                .try_init();
        });
    }

    /// Sleeps for `duration` and tracks how many instances run at the same time.
    #[derive(Default)]
    pub struct Sleeper {
        pub duration: Duration,
        pub runs: AtomicU64,
        pub running: AtomicU64,
        pub max_running: AtomicU64,
    }

    impl Sleeper {
        pub fn new(duration: Duration) -> Self {
            Sleeper {
                duration,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Iteration for Sleeper {
        async fn run(&self, _nth: u64) {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::test_common::{init, Sleeper};
    use crate::{ArrivalGenerator, Cycle, Runner, TokioRunner};
    use linkload_http::{ConstantArrivalRate, ConstantRate, ExecutorSpec, SharedIterations};
    use linkload_metrics::RunStats;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn arrival_rate(rate: u32, duration: Duration, pre: u32, max: u32) -> ConstantArrivalRate {
        ConstantArrivalRate {
            rate: ConstantRate {
                count_per_sec: rate,
            },
            time_unit: Duration::from_secs(1),
            duration,
            pre_allocated_workers: pre,
            max_workers: max,
            graceful_stop: Duration::from_secs(5),
            request_bundle_size: 10,
        }
    }

    #[tokio::test]
    async fn generator_with_partial_cycle() {
        let spec = arrival_rate(500, Duration::from_millis(2500), 1, 1);
        let generator = ArrivalGenerator::from(&spec);
        assert_eq!(generator.total_cycles(), 3);
        let cycles = generator.collect::<Vec<_>>().await;
        assert_eq!(
            cycles,
            vec![
                Cycle {
                    nth: 0,
                    iterations: 500,
                    length: Duration::from_secs(1)
                },
                Cycle {
                    nth: 1,
                    iterations: 500,
                    length: Duration::from_secs(1)
                },
                Cycle {
                    nth: 2,
                    iterations: 250,
                    length: Duration::from_millis(500)
                },
            ]
        );
    }

    #[tokio::test]
    async fn generator_with_whole_cycles() {
        let spec = arrival_rate(10, Duration::from_secs(120), 1, 1);
        let generator = ArrivalGenerator::from(&spec);
        assert_eq!(generator.total_cycles(), 120);
        let total: u32 = generator.map(|c| c.iterations).collect::<Vec<_>>().await.iter().sum();
        assert_eq!(total, 1200);
    }

    #[tokio::test]
    async fn run_setup_once_returns_setup_result() {
        let runner = TokioRunner::new(Arc::new(RunStats::new("setup").unwrap()));
        let pool = runner.run_setup_once(async { vec!["a", "b"] }).await;
        assert_eq!(pool, vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatch_by_spec() {
        init();
        let stats = Arc::new(RunStats::new("dispatch").unwrap());
        let runner = TokioRunner::new(stats.clone());
        let iteration = Arc::new(Sleeper::new(Duration::from_millis(1)));
        let spec = ExecutorSpec::SharedIterations(SharedIterations {
            iterations: 12,
            workers: 3,
            max_duration: Duration::from_secs(30),
            graceful_stop: Duration::from_secs(5),
        });
        let report = runner
            .run_iterations_concurrently(iteration.clone(), &spec)
            .await;
        assert_eq!(report.completed, 12);
        assert_eq!(iteration.runs.load(Ordering::SeqCst), 12);
        assert_eq!(stats.metrics().iteration_count(), 12);

        let spec = ExecutorSpec::ConstantArrivalRate(arrival_rate(20, Duration::from_secs(1), 10, 20));
        let report = runner
            .run_iterations_concurrently(iteration.clone(), &spec)
            .await;
        assert_eq!(report.started, 20);
        assert_eq!(report.completed, 20);
        assert_eq!(stats.metrics().iteration_count(), 32);
    }
}
