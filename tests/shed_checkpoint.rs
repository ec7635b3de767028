use loadgate::shed::{ESTIMATE_GRACE, MIN_REFRESH_INTERVAL};
use loadgate::{LoadAnalyzer, LoadSignal, MetricsHandle, ProgressiveShedder, RequestRecord, Scope, ShedConfig};
use std::time::{Duration, Instant};

fn shedder(signal: LoadSignal) -> ProgressiveShedder {
    ProgressiveShedder::new(
        ShedConfig {
            soft_limit: 1.0,
            hard_limit: 10.0,
            steps: 4,
            signal,
        },
        MetricsHandle::default(),
    )
}

fn completed(queueing_ms: u64, busy: u32) -> RequestRecord {
    let mut record = RequestRecord::new(Scope::new(1));
    record.queueing_time = Duration::from_millis(queueing_ms);
    record.workers_busy_at_dispatch = busy;
    record
}

#[test]
fn shed_checkpoint_everyone_is_admitted_before_the_estimate_settles() {
    let shedder = shedder(LoadSignal::QueueingTime);
    let start = Instant::now();
    let probe = RequestRecord::new(Scope::new(1));

    // No feedback yet.
    assert!(shedder.allow_access_at(&probe, start));

    // Saturating feedback arrives, but the first estimate is still inside
    // the grace window.
    shedder.analyze_request_at(&completed(10_000, 0), start);
    assert!(shedder.allow_access_at(&probe, start + Duration::from_millis(500)));

    // Once the grace window lapses the schedule takes over and sheds
    // everything at this load.
    let settled = start + ESTIMATE_GRACE;
    assert!(!shedder.allow_access_at(&probe, settled));
}

#[test]
fn shed_checkpoint_half_load_sheds_half_the_cycle() {
    let shedder = shedder(LoadSignal::QueueingTime);
    let start = Instant::now();
    let probe = RequestRecord::new(Scope::new(1));

    // Load 5 sits halfway between the soft limit 1 and hard limit 10.
    shedder.analyze_request_at(&completed(5, 0), start);
    let settled = start + ESTIMATE_GRACE;

    let admitted = (0..8)
        .filter(|_| shedder.allow_access_at(&probe, settled))
        .count();
    assert_eq!(admitted, 4);
}

#[test]
fn shed_checkpoint_estimate_refreshes_are_rate_limited() {
    let shedder = shedder(LoadSignal::QueueingTime);
    let start = Instant::now();

    shedder.analyze_request_at(&completed(8, 0), start);
    assert_eq!(shedder.load_estimate(), 8.0);

    // Inside the refresh interval the sample is dropped.
    shedder.analyze_request_at(&completed(100, 0), start + Duration::from_millis(10));
    assert_eq!(shedder.load_estimate(), 8.0);

    // After the interval it is folded in by halving.
    shedder.analyze_request_at(&completed(4, 0), start + MIN_REFRESH_INTERVAL);
    assert_eq!(shedder.load_estimate(), 6.0);
}

#[test]
fn shed_checkpoint_busy_worker_signal_uses_occupancy() {
    let shedder = shedder(LoadSignal::BusyWorkers);
    let start = Instant::now();
    let probe = RequestRecord::new(Scope::new(1));

    shedder.analyze_request_at(&completed(0, 10), start);
    let settled = start + ESTIMATE_GRACE;
    assert_eq!(shedder.load_estimate(), 10.0);
    assert!(!shedder.allow_access_at(&probe, settled));
}
