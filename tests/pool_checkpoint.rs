use loadgate::{DelayedResponder, MetricsHandle, PoolConfig, RequestRecord, Scope, WorkerPool};
use loadgate::util::error::PoolError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn start_pool(
    num_workers: usize,
    max_rps_per_worker: u32,
    queue_capacity: usize,
    response_time: Duration,
) -> loadgate::PoolHandle {
    WorkerPool::start(
        PoolConfig {
            num_workers,
            max_rps_per_worker,
            queue_capacity,
        },
        Arc::new(DelayedResponder { response_time }),
        MetricsHandle::default(),
    )
}

#[test]
fn pool_checkpoint_saturation_shows_up_as_queue_depth() {
    let handle = start_pool(2, 1000, 1, Duration::from_millis(100));
    let pool = handle.pool();

    let mut serves = Vec::new();
    for i in 0..6u64 {
        let pool = pool.clone();
        serves.push(thread::spawn(move || {
            pool.serve(RequestRecord::new(Scope::new(i)))
        }));
    }

    let mut max_depth = 0;
    let mut max_busy = 0;
    for serve in serves {
        let record = serve.join().unwrap().unwrap();
        assert!(record.processing_time >= Duration::from_millis(100));
        assert!(record.total_time >= record.processing_time);
        max_depth = max_depth.max(record.queue_depth_at_dispatch);
        max_busy = max_busy.max(record.workers_busy_at_dispatch);
    }

    // With two workers tied up for 100ms each, later arrivals must have
    // observed a non-empty queue and busy workers.
    assert!(max_depth >= 1, "no request ever saw queued work");
    assert!(max_busy >= 1);
    assert!(max_busy <= 2);
}

#[test]
fn pool_checkpoint_dispatch_is_paced_by_the_worker_rate_limit() {
    let handle = start_pool(1, 50, 10, Duration::ZERO);
    let pool = handle.pool();

    let started = Instant::now();
    for i in 0..3u64 {
        pool.serve(RequestRecord::new(Scope::new(i))).unwrap();
    }
    // One token per 20ms after the initial one.
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[test]
fn pool_checkpoint_queueing_time_covers_the_wait_for_a_worker() {
    let handle = start_pool(1, 1000, 5, Duration::from_millis(80));
    let pool = handle.pool();

    let first = {
        let pool = pool.clone();
        thread::spawn(move || pool.serve(RequestRecord::new(Scope::new(1))))
    };
    // Let the first request occupy the only worker.
    thread::sleep(Duration::from_millis(20));
    let second = pool.serve(RequestRecord::new(Scope::new(2))).unwrap();
    first.join().unwrap().unwrap();

    assert!(second.queueing_time >= Duration::from_millis(40));
}

#[test]
fn pool_checkpoint_shutdown_releases_queued_callers() {
    let mut handle = start_pool(1, 1000, 4, Duration::from_millis(150));
    let pool = handle.pool();

    // First request occupies the only worker for 150ms.
    let in_flight = {
        let pool = pool.clone();
        thread::spawn(move || pool.serve(RequestRecord::new(Scope::new(1))))
    };
    thread::sleep(Duration::from_millis(30));
    // Second request is queued behind it and never dispatched.
    let queued = {
        let pool = pool.clone();
        thread::spawn(move || pool.serve(RequestRecord::new(Scope::new(2))))
    };
    thread::sleep(Duration::from_millis(30));

    handle.shutdown();

    let in_flight = in_flight.join().unwrap();
    assert!(in_flight.is_ok(), "the dispatched request must complete");
    match queued.join().unwrap() {
        Err(PoolError::WorkerGone) => {}
        other => panic!("expected WorkerGone for the abandoned request, got {other:?}"),
    }
}

#[test]
fn pool_checkpoint_serve_fails_cleanly_after_shutdown() {
    let mut handle = start_pool(2, 1000, 4, Duration::ZERO);
    let pool = handle.pool();

    pool.serve(RequestRecord::new(Scope::new(1))).unwrap();
    handle.shutdown();

    match pool.serve(RequestRecord::new(Scope::new(2))) {
        Err(PoolError::QueueClosed) => {}
        other => panic!("expected QueueClosed, got {other:?}"),
    }
}
