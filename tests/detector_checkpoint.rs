use loadgate::{
    DetectorConfig, LoadAnalyzer, MetricsHandle, OverloadDetector, RequestRecord, Scope,
    SlidingWindowRequestTracker, ThrottlePolicy,
};
use std::time::{Duration, Instant};

const THRESHOLD: Duration = Duration::from_millis(50);
const CIRCUIT_TIMEOUT: Duration = Duration::from_secs(5);

fn detector(policy: ThrottlePolicy) -> OverloadDetector {
    OverloadDetector::new(
        DetectorConfig {
            overload_threshold: THRESHOLD,
            circuit_timeout: CIRCUIT_TIMEOUT,
            policy,
        },
        Box::new(SlidingWindowRequestTracker::new(Duration::from_secs(60))),
        MetricsHandle::default(),
    )
}

fn completed(scope: Scope, queueing_ms: u64) -> RequestRecord {
    let mut record = RequestRecord::new(scope);
    record.queueing_time = Duration::from_millis(queueing_ms);
    record.processing_time = Duration::from_millis(10);
    record
}

fn drive_unhealthy(detector: &OverloadDetector, scope: Scope, now: Instant) {
    for _ in 0..20 {
        detector.analyze_request_at(&completed(scope, 500), now);
        if detector.is_unhealthy() {
            return;
        }
    }
    panic!("sustained queueing never tripped the detector");
}

#[test]
fn detector_checkpoint_global_policy_sheds_every_scope() {
    let detector = detector(ThrottlePolicy::Global { rate: 1.0 });
    let now = Instant::now();
    let scope = Scope::new(1);

    assert!(detector.allow_access_at(&RequestRecord::new(scope), now));
    drive_unhealthy(&detector, scope, now);

    // Rate 1.0 is a full block, so the gate is deterministic.
    assert!(!detector.allow_access_at(&RequestRecord::new(scope), now));
    assert!(!detector.allow_access_at(&RequestRecord::new(Scope::new(99)), now));
}

#[test]
fn detector_checkpoint_top_hitter_policy_bans_only_the_heaviest_scope() {
    let detector = detector(ThrottlePolicy::TopHitter);
    let now = Instant::now();
    let heavy = Scope::new(2);
    let light = Scope::new(3);

    // The heavy scope dominates the usage window before the trip.
    for _ in 0..10 {
        detector.analyze_request_at(&completed(heavy, 0), now);
    }
    detector.analyze_request_at(&completed(light, 0), now);

    drive_unhealthy(&detector, heavy, now);

    assert!(!detector.allow_access_at(&RequestRecord::new(heavy), now));
    assert!(detector.allow_access_at(&RequestRecord::new(light), now));
}

#[test]
fn detector_checkpoint_recovery_waits_out_the_circuit_timeout() {
    let detector = detector(ThrottlePolicy::Global { rate: 1.0 });
    let tripped_at = Instant::now();
    let scope = Scope::new(1);

    drive_unhealthy(&detector, scope, tripped_at);

    // Load falls back below the threshold immediately, but the dwell time
    // has not elapsed: the throttle must hold.
    for i in 0..50u32 {
        detector.analyze_request_at(
            &completed(scope, 0),
            tripped_at + Duration::from_millis(u64::from(i)),
        );
    }
    assert!(detector.is_unhealthy());
    assert!(!detector.allow_access_at(&RequestRecord::new(scope), tripped_at));

    // One quiet sample after the dwell window clears the state and the
    // throttle table.
    detector.analyze_request_at(
        &completed(scope, 0),
        tripped_at + CIRCUIT_TIMEOUT + Duration::from_secs(1),
    );
    assert!(!detector.is_unhealthy());
    assert!(detector.allow_access_at(&RequestRecord::new(scope), tripped_at));
}

#[test]
fn detector_checkpoint_load_average_decays_between_bursts() {
    let detector = detector(ThrottlePolicy::Global { rate: 0.5 });
    let now = Instant::now();
    let scope = Scope::new(1);

    detector.analyze_request_at(&completed(scope, 300), now);
    let after_burst = detector.load_avg();
    assert!(after_burst > Duration::ZERO);

    for _ in 0..200 {
        detector.analyze_request_at(&completed(scope, 0), now);
    }
    assert!(detector.load_avg() < after_burst / 4);
}
