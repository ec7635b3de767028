//! Fixed-capacity worker pool with per-worker rate limiting.
//!
//! All workers drain one shared bounded queue; each worker gates its own
//! dequeue on a personal token bucket. Completion is signalled through a
//! per-request one-shot channel, never a broadcast, so a blocked `serve`
//! can only be woken by its own request.

use crate::limiter::RateLimiter;
use crate::queue::WorkQueue;
use crate::request::RequestRecord;
use crate::telemetry::MetricsHandle;
use crate::timeouts::{CANCEL_POLL_INTERVAL, POOL_REPORT_INTERVAL};
use crate::util::error::PoolError;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

/// Downstream work executed by a worker for one admitted request.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, record: &RequestRecord);
}

/// Simulated downstream that takes a fixed wall-clock time per request.
pub struct DelayedResponder {
    pub response_time: Duration,
}

impl RequestHandler for DelayedResponder {
    fn handle(&self, _record: &RequestRecord) {
        thread::sleep(self.response_time);
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_workers: usize,
    pub max_rps_per_worker: u32,
    pub queue_capacity: usize,
}

struct Work {
    record: RequestRecord,
    done: mpsc::Sender<RequestRecord>,
}

pub struct WorkerPool {
    queue: Arc<WorkQueue<Work>>,
    busy: AtomicU32,
    num_workers: usize,
    cancel: Arc<AtomicBool>,
    metrics: MetricsHandle,
}

impl WorkerPool {
    /// Spawns the workers and the occupancy reporter and returns
    /// immediately. The returned handle owns the worker threads; dropping
    /// it drains and joins them.
    pub fn start<H: RequestHandler>(
        config: PoolConfig,
        handler: Arc<H>,
        metrics: MetricsHandle,
    ) -> PoolHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let pool = Arc::new(WorkerPool {
            queue: Arc::new(WorkQueue::with_capacity(config.queue_capacity)),
            busy: AtomicU32::new(0),
            num_workers: config.num_workers,
            cancel: cancel.clone(),
            metrics,
        });

        let mut workers = Vec::with_capacity(config.num_workers);
        for worker_id in 0..config.num_workers {
            let pool = pool.clone();
            let handler = handler.clone();
            let limiter = RateLimiter::new(config.max_rps_per_worker, cancel.clone());
            workers.push(thread::spawn(move || {
                worker_loop(worker_id, pool, handler.as_ref(), limiter);
            }));
        }

        let reporter = {
            let pool = pool.clone();
            thread::spawn(move || report_occupancy(pool))
        };

        info!(
            "event=pool_started workers={} max_rps_per_worker={} queue_capacity={}",
            config.num_workers, config.max_rps_per_worker, config.queue_capacity
        );

        PoolHandle {
            pool,
            workers,
            reporter: Some(reporter),
        }
    }

    /// Enqueues the request and blocks the calling path until this specific
    /// request completes, then stamps its timing and occupancy fields.
    ///
    /// Blocks on enqueue while the shared queue is full; that wait is the
    /// pool's backpressure signal and is charged to queueing time.
    pub fn serve(&self, mut record: RequestRecord) -> Result<RequestRecord, PoolError> {
        let enqueued_at = Instant::now();
        let (done, completion) = mpsc::channel();
        record.workers_busy_at_dispatch = self.busy.load(Ordering::Relaxed);
        let depth = self.queue.push(Work { record, done })?;

        let mut record = completion.recv().map_err(|_| PoolError::WorkerGone)?;
        record.queue_depth_at_dispatch = depth;
        record.total_time = enqueued_at.elapsed();
        record.queueing_time = record.total_time.saturating_sub(record.processing_time);
        Ok(record)
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn workers_busy(&self) -> u32 {
        self.busy.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }
}

fn worker_loop<H: RequestHandler>(
    worker_id: usize,
    pool: Arc<WorkerPool>,
    handler: &H,
    limiter: RateLimiter,
) {
    loop {
        match limiter.acquire() {
            Ok(()) => {}
            Err(PoolError::Cancelled) => {
                debug!("event=worker_stopped worker={worker_id} reason=cancelled");
                break;
            }
            Err(err) => {
                // An unrecoverable limiter failure must not leave the pool
                // dispatching with inconsistent pacing: stop accepting work.
                error!("event=worker_limiter_failed worker={worker_id} error={err}");
                let _ = pool.queue.close();
                break;
            }
        }

        let mut work = match pool.queue.pop() {
            Ok(Some(work)) => work,
            Ok(None) => {
                debug!("event=worker_stopped worker={worker_id} reason=queue_closed");
                break;
            }
            Err(err) => {
                error!("event=worker_queue_failed worker={worker_id} error={err}");
                break;
            }
        };

        pool.busy.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        handler.handle(&work.record);
        work.record.processing_time = started.elapsed();
        pool.busy.fetch_sub(1, Ordering::Relaxed);
        pool.metrics.inc_counter("worker.completed", 1);

        // The caller may have given up; a dropped receiver is not an error.
        let _ = work.done.send(work.record);
    }
}

fn report_occupancy(pool: Arc<WorkerPool>) {
    while !pool.cancel.load(Ordering::Relaxed) {
        pool.metrics
            .set_gauge("workers.online", pool.num_workers as f64);
        pool.metrics
            .set_gauge("workers.busy", f64::from(pool.workers_busy()));
        pool.metrics
            .set_gauge("queue.depth", pool.queue_depth() as f64);
        let mut slept = Duration::ZERO;
        while slept < POOL_REPORT_INTERVAL && !pool.cancel.load(Ordering::Relaxed) {
            thread::sleep(CANCEL_POLL_INTERVAL);
            slept += CANCEL_POLL_INTERVAL;
        }
    }
}

/// Owns the pool's threads. `shutdown` (or `Drop`) closes the queue and
/// cancels the limiters: requests already being processed complete, no new
/// dequeues occur, and callers still queued observe `WorkerGone`.
pub struct PoolHandle {
    pool: Arc<WorkerPool>,
    workers: Vec<thread::JoinHandle<()>>,
    reporter: Option<thread::JoinHandle<()>>,
}

impl PoolHandle {
    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    pub fn shutdown(&mut self) {
        self.pool.cancel.store(true, Ordering::SeqCst);
        let _ = self.pool.queue.close();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("event=pool_worker_panic");
            }
        }
        // Workers exit at the limiter, leaving undispatched items behind.
        // Discarding them drops their completion senders, which releases
        // every serve caller still blocked on its rendezvous.
        let mut discarded = 0u64;
        while let Ok(Some(_)) = self.pool.queue.pop() {
            discarded += 1;
        }
        if discarded > 0 {
            info!("event=pool_shutdown_discarded_queued count={discarded}");
        }
        if let Some(reporter) = self.reporter.take() {
            let _ = reporter.join();
        }
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Instant200;

    impl RequestHandler for Instant200 {
        fn handle(&self, _record: &RequestRecord) {}
    }

    #[test]
    fn serve_round_trips_a_record() {
        let handle = WorkerPool::start(
            PoolConfig {
                num_workers: 2,
                max_rps_per_worker: 1000,
                queue_capacity: 8,
            },
            Arc::new(Instant200),
            MetricsHandle::default(),
        );
        let record = RequestRecord::new(crate::scope::Scope::new(1));
        let served = handle.pool().serve(record).unwrap();
        assert!(served.total_time >= served.processing_time);
        assert!(served.queue_depth_at_dispatch >= 1);
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let mut handle = WorkerPool::start(
            PoolConfig {
                num_workers: 1,
                max_rps_per_worker: 1000,
                queue_capacity: 1,
            },
            Arc::new(Instant200),
            MetricsHandle::default(),
        );
        let pool = handle.pool();
        handle.shutdown();
        let result = pool.serve(RequestRecord::new(crate::scope::Scope::new(1)));
        assert!(matches!(result, Err(PoolError::QueueClosed)));
    }
}
