//! Progressive load shedding: a deterministic modulus schedule instead of a
//! Bernoulli gate.
//!
//! The schedule rejects a fraction of each `steps`-long request cycle that
//! grows from zero at the soft limit to everything at the hard limit, so
//! rejections are evenly spread rather than random.

use crate::admission::LoadAnalyzer;
use crate::request::RequestRecord;
use crate::telemetry::MetricsHandle;
use crate::util::error::lock_or_poison;
use log::{debug, error};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Load-estimate refreshes closer together than this are dropped to damp
/// noise.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);
/// Admission is unconditional until this long after the first refresh; the
/// estimate is not trustworthy before then.
pub const ESTIMATE_GRACE: Duration = Duration::from_secs(1);

/// Which completed-request field feeds the load estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSignal {
    /// Queueing delay, in milliseconds.
    QueueingTime,
    /// Busy-worker count at dispatch.
    BusyWorkers,
}

impl LoadSignal {
    fn sample(self, record: &RequestRecord) -> f64 {
        match self {
            LoadSignal::QueueingTime => record.queueing_time.as_secs_f64() * 1e3,
            LoadSignal::BusyWorkers => f64::from(record.workers_busy_at_dispatch),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShedConfig {
    /// Load level at which shedding begins.
    pub soft_limit: f64,
    /// Load level at which everything is rejected.
    pub hard_limit: f64,
    /// Slots in one rejection cycle.
    pub steps: u32,
    pub signal: LoadSignal,
}

/// The deterministic cyclic schedule, separated from the estimator so its
/// arithmetic can be exercised exactly.
#[derive(Debug)]
pub struct ShedSchedule {
    soft_limit: f64,
    hard_limit: f64,
    steps: u32,
    modulus: u32,
}

impl ShedSchedule {
    pub fn new(soft_limit: f64, hard_limit: f64, steps: u32) -> Self {
        Self {
            soft_limit,
            hard_limit,
            steps: steps.max(1),
            modulus: 0,
        }
    }

    /// Advances the cycle and decides admission for the current load.
    /// Rejects iff the cycle position has reached the load-derived
    /// threshold `floor((hard - load) / ((hard - soft) / steps))`.
    pub fn admit(&mut self, load: f64) -> bool {
        let divisor = (self.hard_limit - self.soft_limit) / f64::from(self.steps);
        let position = self.modulus;
        self.modulus = (self.modulus + 1) % self.steps;
        let threshold = ((self.hard_limit - load) / divisor).floor();
        f64::from(position) < threshold
    }
}

struct ShedState {
    schedule: ShedSchedule,
    load: f64,
    last_refresh: Option<Instant>,
    first_refresh: Option<Instant>,
}

pub struct ProgressiveShedder {
    signal: LoadSignal,
    state: Mutex<ShedState>,
    metrics: MetricsHandle,
}

impl ProgressiveShedder {
    pub fn new(config: ShedConfig, metrics: MetricsHandle) -> Self {
        Self {
            signal: config.signal,
            state: Mutex::new(ShedState {
                schedule: ShedSchedule::new(config.soft_limit, config.hard_limit, config.steps),
                load: 0.0,
                last_refresh: None,
                first_refresh: None,
            }),
            metrics,
        }
    }

    pub fn load_estimate(&self) -> f64 {
        lock_or_poison(&self.state, "shedder state")
            .map(|state| state.load)
            .unwrap_or(0.0)
    }
}

impl LoadAnalyzer for ProgressiveShedder {
    fn allow_access_at(&self, _record: &RequestRecord, now: Instant) -> bool {
        let mut state = match lock_or_poison(&self.state, "shedder state") {
            Ok(state) => state,
            Err(err) => {
                error!("event=shed_admit_failed error={err}");
                return true;
            }
        };
        // Grace window: no estimate yet, or the first one is still young.
        let trustworthy = match state.first_refresh {
            Some(first) => now.saturating_duration_since(first) >= ESTIMATE_GRACE,
            None => false,
        };
        if !trustworthy {
            return true;
        }
        let load = state.load;
        let admitted = state.schedule.admit(load);
        if !admitted {
            self.metrics.inc_counter("shed.rejected", 1);
        }
        admitted
    }

    fn analyze_request_at(&self, record: &RequestRecord, now: Instant) {
        let mut state = match lock_or_poison(&self.state, "shedder state") {
            Ok(state) => state,
            Err(err) => {
                error!("event=shed_observe_failed error={err}");
                return;
            }
        };
        let due = state
            .last_refresh
            .map_or(true, |last| now.saturating_duration_since(last) >= MIN_REFRESH_INTERVAL);
        if !due {
            return;
        }
        let sample = self.signal.sample(record);
        state.load = match state.last_refresh {
            // Exponential smoothing once primed; the first sample seeds the
            // estimate outright.
            Some(_) => (state.load + sample) / 2.0,
            None => sample,
        };
        state.last_refresh = Some(now);
        if state.first_refresh.is_none() {
            state.first_refresh = Some(now);
            debug!("event=shed_estimate_primed load={sample}");
        }
        self.metrics.set_gauge("shed.load_estimate", state.load);
    }
}
