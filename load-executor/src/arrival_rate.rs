use std::cmp::{max, min};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use linkload_http::ConstantArrivalRate;
use linkload_metrics::RunStats;
use log::{debug, trace, warn};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout};
use tokio_stream::StreamExt;

use crate::{spawn_iteration, ArrivalGenerator, Cycle, ExecutionReport, Iteration};

/// Workers are semaphore permits. Starts with the pre-allocated ones and grows on demand.
struct WorkerPool {
    semaphore: Arc<Semaphore>,
    allocated: u32,
    max_workers: u32,
    warned: bool,
    stats: Arc<RunStats>,
}

impl WorkerPool {
    fn new(pre_allocated: u32, max_workers: u32, stats: Arc<RunStats>) -> Self {
        let max_workers = max(pre_allocated, max_workers);
        stats.record_workers(pre_allocated);
        WorkerPool {
            semaphore: Arc::new(Semaphore::new(pre_allocated as usize)),
            allocated: pre_allocated,
            max_workers,
            warned: false,
            stats,
        }
    }

    /// A free worker, allocating a new one if none is idle. `None` once `max_workers`
    /// are all busy.
    fn acquire(&mut self) -> Option<OwnedSemaphorePermit> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Some(permit);
        }
        if self.allocated >= self.max_workers {
            return None;
        }
        if !self.warned {
            warn!(
                "[WorkerPool] - pre-allocated workers ({}) are insufficient, allocating more up to {}",
                self.allocated, self.max_workers
            );
            self.warned = true;
        }
        self.allocated += 1;
        self.stats.record_workers(self.allocated);
        self.semaphore.add_permits(1);
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Waits for every worker to become idle. Returns `true` if `graceful_stop` expired first.
    async fn wait_for_idle(&self, graceful_stop: Duration) -> bool {
        match timeout(graceful_stop, self.semaphore.acquire_many(self.allocated)).await {
            Ok(_) => false,
            Err(_) => {
                warn!(
                    "[WorkerPool] - graceful stop of {:?} expired, {} iterations still in progress",
                    graceful_stop,
                    self.allocated as usize - self.semaphore.available_permits()
                );
                true
            }
        }
    }
}

struct ArrivalRateExecutor<I> {
    iteration: Arc<I>,
    stats: Arc<RunStats>,
    pool: WorkerPool,
    request_bundle_size: u32,
    completed: Arc<AtomicU64>,
    started: u64,
    dropped: u64,
}

pub(crate) async fn run<I>(
    iteration: Arc<I>,
    spec: &ConstantArrivalRate,
    stats: Arc<RunStats>,
) -> ExecutionReport
where
    I: Iteration + 'static,
{
    let start = Instant::now();
    let mut executor = ArrivalRateExecutor {
        iteration,
        pool: WorkerPool::new(spec.pre_allocated_workers, spec.max_workers, stats.clone()),
        stats,
        request_bundle_size: max(spec.request_bundle_size, 1),
        completed: Arc::new(AtomicU64::new(0)),
        started: 0,
        dropped: 0,
    };

    let generator = ArrivalGenerator::from(spec);
    let stream = generator.throttle(spec.time_unit);
    tokio::pin!(stream);

    let mut time_offset: i128 = 0;
    while let Some(cycle) = stream.next().await {
        let start_of_cycle = Instant::now();
        let mut corrected_with_offset = start_of_cycle;
        if time_offset > 0 {
            //the previous cycle took longer than its length, use less time for this one
            corrected_with_offset = start_of_cycle
                .checked_sub(Duration::from_millis(time_offset as u64))
                .unwrap_or(start_of_cycle);
        }
        executor.dispatch_cycle(cycle, corrected_with_offset).await;
        time_offset = start_of_cycle.elapsed().as_millis() as i128 - cycle.length.as_millis() as i128;
    }

    debug!(
        "[arrival_rate::run] - all cycles dispatched, waiting up to {:?} for in-flight iterations",
        spec.graceful_stop
    );
    let graceful_stop_expired = executor.pool.wait_for_idle(spec.graceful_stop).await;
    ExecutionReport {
        started: executor.started,
        completed: executor.completed.load(Ordering::Relaxed),
        dropped: executor.dropped,
        workers_allocated: executor.pool.allocated,
        elapsed: start.elapsed(),
        graceful_stop_expired,
    }
}

impl<I> ArrivalRateExecutor<I>
where
    I: Iteration + 'static,
{
    /// Starts `cycle.iterations` iterations, in bundles spread evenly over the cycle.
    async fn dispatch_cycle(&mut self, cycle: Cycle, start_of_cycle: Instant) {
        debug!(
            "[dispatch_cycle] - cycle: {}, iterations: {}, length: {:?}",
            cycle.nth, cycle.iterations, cycle.length
        );
        if cycle.iterations == 0 {
            trace!("no iterations to start, rate is 0");
            return;
        }

        let cycle_length = cycle.length.as_millis() as i128;
        let time_remaining = move || cycle_length - start_of_cycle.elapsed().as_millis() as i128;
        let interval_between_iterations = |remaining_iterations: u32| {
            let remaining_time_in_cycle = time_remaining();
            trace!(
                "remaining time in cycle:{}, remaining iterations: {}",
                remaining_time_in_cycle,
                remaining_iterations
            );
            if remaining_time_in_cycle < 1 {
                warn!(
                    "no time remaining for {} iterations in this cycle",
                    remaining_iterations
                );
                return 0_f32;
            }
            remaining_time_in_cycle as f32 / remaining_iterations as f32
        };

        let mut remaining = cycle.iterations;
        let bundle_size = min(
            cycle.iterations,
            max((cycle.iterations / 100) + 1, self.request_bundle_size),
        );
        loop {
            let bundle = min(bundle_size, remaining);
            self.start_bundle(bundle);
            remaining -= bundle;
            if remaining == 0 {
                trace!("started all the iterations of the cycle");
                break;
            }
            if time_remaining() < 0 {
                debug!(
                    "[dispatch_cycle] - cycle {} overran, giving up {} iterations",
                    cycle.nth, remaining
                );
                self.drop_iterations(remaining);
                break;
            }
            let mut sleep_time = interval_between_iterations(remaining) * bundle_size as f32;
            //reserve 10% of the time for the internal logic
            sleep_time = (sleep_time - (sleep_time * 0.1)).floor();
            sleep(Duration::from_millis(sleep_time as u64)).await;
        }
    }

    fn start_bundle(&mut self, bundle: u32) {
        let mut no_worker = 0;
        for _ in 0..bundle {
            match self.pool.acquire() {
                Some(permit) => {
                    spawn_iteration(
                        &self.iteration,
                        self.started,
                        permit,
                        &self.stats,
                        &self.completed,
                    );
                    self.started += 1;
                }
                None => no_worker += 1,
            }
        }
        if no_worker > 0 {
            debug!(
                "[start_bundle] - all {} workers are busy, dropping {} iterations",
                self.pool.allocated, no_worker
            );
            self.drop_iterations(no_worker);
        }
    }

    fn drop_iterations(&mut self, count: u32) {
        self.dropped += count as u64;
        self.stats.record_dropped_iterations(count as u64);
    }
}
