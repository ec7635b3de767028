//! Overload detection: a moving average of the queueing-delay signal with a
//! two-state hysteresis machine in front of the throttle table.

use crate::admission::LoadAnalyzer;
use crate::request::RequestRecord;
use crate::telemetry::MetricsHandle;
use crate::throttle::{Throttle, ThrottleTable};
use crate::tracker::UsageTracker;
use crate::util::error::lock_or_poison;
use log::{error, info, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// What to throttle once the platform tips over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThrottlePolicy {
    /// One pool-wide Bernoulli throttle shedding a fixed fraction of all
    /// traffic.
    Global { rate: f64 },
    /// Full block against the single heaviest scope in the tracking
    /// window.
    TopHitter,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Moving-average level above which the platform is unhealthy.
    pub overload_threshold: Duration,
    /// Minimum dwell time in the unhealthy state before recovery is
    /// considered, preventing rapid flapping.
    pub circuit_timeout: Duration,
    pub policy: ThrottlePolicy,
}

struct DetectorState {
    tracker: Box<dyn UsageTracker>,
    load_avg: Duration,
    unhealthy: bool,
    unhealthy_since: Option<Instant>,
}

pub struct OverloadDetector {
    config: DetectorConfig,
    state: Mutex<DetectorState>,
    throttles: ThrottleTable,
    metrics: MetricsHandle,
}

impl OverloadDetector {
    pub fn new(
        config: DetectorConfig,
        tracker: Box<dyn UsageTracker>,
        metrics: MetricsHandle,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(DetectorState {
                tracker,
                load_avg: Duration::ZERO,
                unhealthy: false,
                unhealthy_since: None,
            }),
            throttles: ThrottleTable::new(),
            metrics,
        }
    }

    pub fn activate_throttle(&self, throttle: Throttle) {
        if let Err(err) = self.throttles.activate(throttle) {
            error!("event=throttle_activate_failed error={err}");
        }
    }

    pub fn clear_throttles(&self) {
        if let Err(err) = self.throttles.clear() {
            error!("event=throttle_clear_failed error={err}");
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        lock_or_poison(&self.state, "detector state")
            .map(|state| state.unhealthy)
            .unwrap_or(false)
    }

    pub fn load_avg(&self) -> Duration {
        lock_or_poison(&self.state, "detector state")
            .map(|state| state.load_avg)
            .unwrap_or(Duration::ZERO)
    }

    fn trigger_unhealthy(&self, state: &mut DetectorState, now: Instant) {
        if state.unhealthy {
            return;
        }
        state.unhealthy = true;
        state.unhealthy_since = Some(now);
        self.metrics.inc_counter("overload.trips", 1);

        match self.config.policy {
            ThrottlePolicy::Global { rate } => {
                warn!(
                    "event=platform_unhealthy action=global_throttle rate={rate} load_avg_ms={}",
                    state.load_avg.as_millis()
                );
                self.activate_throttle(Throttle::global(rate));
            }
            ThrottlePolicy::TopHitter => match state.tracker.max(1).first() {
                Some(scope) => {
                    warn!(
                        "event=platform_unhealthy action=ban_scope scope={scope} load_avg_ms={}",
                        state.load_avg.as_millis()
                    );
                    self.activate_throttle(Throttle::for_scope(*scope, 1.0));
                }
                None => {
                    warn!("event=platform_unhealthy action=none reason=no_tracked_scope");
                }
            },
        }
    }

    fn trigger_healthy(&self, state: &mut DetectorState) {
        state.unhealthy = false;
        state.unhealthy_since = None;
        self.clear_throttles();
        info!("event=platform_recovered");
    }
}

impl LoadAnalyzer for OverloadDetector {
    fn allow_access_at(&self, record: &RequestRecord, _now: Instant) -> bool {
        match self.throttles.allow(record.scope) {
            Ok(allowed) => allowed,
            Err(err) => {
                // Fail open: a broken throttle table must not turn into a
                // full outage.
                error!("event=throttle_lookup_failed error={err}");
                true
            }
        }
    }

    fn analyze_request_at(&self, record: &RequestRecord, now: Instant) {
        let mut state = match lock_or_poison(&self.state, "detector state") {
            Ok(state) => state,
            Err(err) => {
                error!("event=detector_analyze_failed error={err}");
                return;
            }
        };

        state
            .tracker
            .add(record.scope, record.processing_time, now);

        // Per completed request: 1/100 decay, 1/30 gain.
        state.load_avg = state.load_avg - state.load_avg / 100 + record.queueing_time / 30;
        self.metrics
            .set_gauge("overload.load_avg_ms", state.load_avg.as_secs_f64() * 1e3);

        if state.load_avg > self.config.overload_threshold {
            self.trigger_unhealthy(&mut state, now);
        } else if state.unhealthy {
            let tripped_long_enough = state
                .unhealthy_since
                .map(|since| now.saturating_duration_since(since) > self.config.circuit_timeout)
                .unwrap_or(true);
            if tripped_long_enough {
                self.trigger_healthy(&mut state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use crate::tracker::SlidingWindowRequestTracker;

    fn detector(policy: ThrottlePolicy) -> OverloadDetector {
        OverloadDetector::new(
            DetectorConfig {
                overload_threshold: Duration::from_millis(50),
                circuit_timeout: Duration::from_secs(30),
                policy,
            },
            Box::new(SlidingWindowRequestTracker::new(Duration::from_secs(60))),
            MetricsHandle::default(),
        )
    }

    fn slow_record(scope: Scope, queueing_ms: u64) -> RequestRecord {
        let mut record = RequestRecord::new(scope);
        record.queueing_time = Duration::from_millis(queueing_ms);
        record.processing_time = Duration::from_millis(10);
        record
    }

    #[test]
    fn sustained_queueing_delay_trips_the_detector() {
        let detector = detector(ThrottlePolicy::TopHitter);
        let now = Instant::now();
        let scope = Scope::new(42);
        for i in 0..60 {
            detector.analyze_request_at(
                &slow_record(scope, 2000),
                now + Duration::from_millis(i * 10),
            );
        }
        assert!(detector.is_unhealthy());
        assert!(!detector.allow_access_at(&RequestRecord::new(scope), now));
        // Other scopes stay admitted under the top-hitter policy.
        assert!(detector.allow_access_at(&RequestRecord::new(Scope::new(7)), now));
    }

    #[test]
    fn single_spike_does_not_trip() {
        let detector = detector(ThrottlePolicy::Global { rate: 0.5 });
        let now = Instant::now();
        detector.analyze_request_at(&slow_record(Scope::new(1), 60), now);
        assert!(!detector.is_unhealthy());
    }
}
