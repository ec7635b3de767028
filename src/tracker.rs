//! Per-scope usage tracking behind a small seam so the overload detector
//! can swap aggregation policies.

use crate::scope::Scope;
use crate::window::SlidingWindowCounter;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Answers "which scope is the heaviest" from a stream of per-request
/// costs.
pub trait UsageTracker: Send {
    fn add(&mut self, scope: Scope, cost: Duration, now: Instant);

    /// Up to `k` heaviest scopes, heaviest first.
    fn max(&self, k: usize) -> Vec<Scope>;
}

/// Counts requests per scope over a sliding time window, ignoring the cost
/// value. One request is one unit; the window ages counts out.
pub struct SlidingWindowRequestTracker {
    counter: SlidingWindowCounter,
}

impl SlidingWindowRequestTracker {
    /// Buckets the window at one-second granularity.
    pub fn new(window: Duration) -> Self {
        Self::new_at(window, Instant::now())
    }

    pub fn new_at(window: Duration, now: Instant) -> Self {
        Self {
            counter: SlidingWindowCounter::new_at(window, Duration::from_secs(1), now),
        }
    }

    pub fn counter(&self) -> &SlidingWindowCounter {
        &self.counter
    }
}

impl UsageTracker for SlidingWindowRequestTracker {
    fn add(&mut self, scope: Scope, _cost: Duration, now: Instant) {
        self.counter.add_at(scope, 1.0, now);
    }

    fn max(&self, k: usize) -> Vec<Scope> {
        self.counter.max(k)
    }
}

/// Sums the last `limit` processing times per scope in a fixed ring.
/// Retention is count-based rather than time-based, so a quiet scope keeps
/// its history until new samples push it out.
pub struct ProcessingTimeSumTracker {
    rings: HashMap<Scope, SampleRing>,
    limit: usize,
}

struct SampleRing {
    samples: Vec<Duration>,
    cursor: usize,
    sum: Duration,
}

impl SampleRing {
    fn new(limit: usize) -> Self {
        Self {
            samples: vec![Duration::ZERO; limit],
            cursor: 0,
            sum: Duration::ZERO,
        }
    }

    fn push(&mut self, cost: Duration) {
        self.sum = self.sum.saturating_sub(self.samples[self.cursor]) + cost;
        self.samples[self.cursor] = cost;
        self.cursor = (self.cursor + 1) % self.samples.len();
    }
}

impl ProcessingTimeSumTracker {
    pub fn new(limit: usize) -> Self {
        Self {
            rings: HashMap::new(),
            limit: limit.max(1),
        }
    }
}

impl UsageTracker for ProcessingTimeSumTracker {
    fn add(&mut self, scope: Scope, cost: Duration, _now: Instant) {
        self.rings
            .entry(scope)
            .or_insert_with(|| SampleRing::new(self.limit))
            .push(cost);
    }

    fn max(&self, k: usize) -> Vec<Scope> {
        let mut entries: Vec<(Scope, Duration)> = self
            .rings
            .iter()
            .filter(|(_, ring)| ring.sum > Duration::ZERO)
            .map(|(scope, ring)| (*scope, ring.sum))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(k);
        entries.into_iter().map(|(scope, _)| scope).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tracker_counts_requests_not_cost() {
        let now = Instant::now();
        let mut tracker = SlidingWindowRequestTracker::new_at(Duration::from_secs(60), now);
        tracker.add(Scope::new(1), Duration::from_secs(100), now);
        tracker.add(Scope::new(2), Duration::from_millis(1), now);
        tracker.add(Scope::new(2), Duration::from_millis(1), now);
        assert_eq!(tracker.max(1), vec![Scope::new(2)]);
    }

    #[test]
    fn sum_tracker_rolls_over_its_ring() {
        let now = Instant::now();
        let mut tracker = ProcessingTimeSumTracker::new(2);
        tracker.add(Scope::new(1), Duration::from_millis(100), now);
        tracker.add(Scope::new(1), Duration::from_millis(100), now);
        // Third sample overwrites the first; the sum covers the last two.
        tracker.add(Scope::new(1), Duration::from_millis(10), now);
        tracker.add(Scope::new(2), Duration::from_millis(200), now);
        assert_eq!(tracker.max(2), vec![Scope::new(2), Scope::new(1)]);
    }
}
