use std::cmp::min;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use linkload_http::SharedIterations;
use linkload_metrics::RunStats;
use log::{debug, trace, warn};
use tokio::time::timeout_at;

use crate::{ExecutionReport, Iteration};

/// `workers` tasks pull sequence numbers off a shared counter until `iterations` are taken
/// or `max_duration` passed.
pub(crate) async fn run<I>(
    iteration: Arc<I>,
    spec: &SharedIterations,
    stats: Arc<RunStats>,
) -> ExecutionReport
where
    I: Iteration + 'static,
{
    let start = Instant::now();
    let deadline = start + spec.max_duration;
    let workers = min(spec.workers as u64, spec.iterations) as u32;
    let next = Arc::new(AtomicU64::new(0));
    let completed = Arc::new(AtomicU64::new(0));
    stats.record_workers(workers);
    debug!(
        "[shared_iterations::run] - iterations: {}, workers: {}",
        spec.iterations, workers
    );

    let handles = (0..workers)
        .map(|worker| {
            let iteration = iteration.clone();
            let stats = stats.clone();
            let next = next.clone();
            let completed = completed.clone();
            let iterations = spec.iterations;
            tokio::spawn(async move {
                loop {
                    if Instant::now() >= deadline {
                        trace!("[shared_iterations] - worker {} - max duration reached", worker);
                        break;
                    }
                    let nth = next.fetch_add(1, Ordering::SeqCst);
                    if nth >= iterations {
                        break;
                    }
                    iteration.run(nth).await;
                    stats.record_iteration();
                    completed.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect::<Vec<_>>();

    let graceful_deadline = tokio::time::Instant::from_std(deadline + spec.graceful_stop);
    let graceful_stop_expired = timeout_at(graceful_deadline, join_all(handles))
        .await
        .is_err();
    if graceful_stop_expired {
        warn!(
            "[shared_iterations::run] - graceful stop of {:?} expired with iterations in progress",
            spec.graceful_stop
        );
    }

    let started = min(next.load(Ordering::SeqCst), spec.iterations);
    if started < spec.iterations {
        warn!(
            "[shared_iterations::run] - only {} of {} iterations started within {:?}",
            started, spec.iterations, spec.max_duration
        );
    }
    ExecutionReport {
        started,
        completed: completed.load(Ordering::Relaxed),
        dropped: 0,
        workers_allocated: workers,
        elapsed: start.elapsed(),
        graceful_stop_expired,
    }
}
