//! Time-bucketed sliding-window accumulator with O(1) amortized eviction.
//!
//! A fixed ring of buckets covers the tracking window; a summary bucket
//! holds the live per-scope sum across the ring so reads never rescan
//! history. Advancing time evicts the oldest buckets by subtracting their
//! contents from the summary.

use crate::scope::Scope;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cap on distinct scopes per bucket. New scopes past the cap are dropped
/// instead of evicting an existing entry; the drop is counted.
const BUCKET_MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, Default)]
struct Bucket {
    frequencies: HashMap<Scope, f64>,
}

impl Bucket {
    fn add(&mut self, scope: Scope, value: f64) -> bool {
        if !self.frequencies.contains_key(&scope) && self.frequencies.len() >= BUCKET_MAX_ENTRIES {
            return false;
        }
        *self.frequencies.entry(scope).or_insert(0.0) += value;
        true
    }
}

#[derive(Debug)]
pub struct SlidingWindowCounter {
    granularity: Duration,
    num_buckets: usize,
    cursor: usize,
    last_tick: Instant,
    buckets: Vec<Bucket>,
    summary: Bucket,
    dropped: u64,
}

impl SlidingWindowCounter {
    /// `window` and `granularity` must be validated by the caller to be
    /// non-zero with `window >= granularity`; config loading enforces this.
    pub fn new(window: Duration, granularity: Duration) -> Self {
        Self::new_at(window, granularity, Instant::now())
    }

    pub fn new_at(window: Duration, granularity: Duration, now: Instant) -> Self {
        let num_buckets =
            ((window.as_nanos() / granularity.as_nanos().max(1)) as usize).max(1);
        Self {
            granularity,
            num_buckets,
            cursor: 0,
            last_tick: now,
            buckets: vec![Bucket::default(); num_buckets],
            summary: Bucket::default(),
            dropped: 0,
        }
    }

    pub fn add(&mut self, scope: Scope, value: f64) {
        self.add_at(scope, value, Instant::now());
    }

    /// Advances the window to `now`, then accumulates `value` for `scope`
    /// into the current bucket and the summary.
    pub fn add_at(&mut self, scope: Scope, value: f64, now: Instant) {
        self.tick(now);
        if self.buckets[self.cursor].add(scope, value) {
            self.summary.add(scope, value);
        } else {
            self.dropped += 1;
        }
    }

    /// Up to `k` scopes with the largest accumulated value, largest first.
    /// Ties break toward the smaller tenant id so the result is
    /// deterministic.
    pub fn max(&self, k: usize) -> Vec<Scope> {
        let mut entries: Vec<(Scope, f64)> = self
            .summary
            .frequencies
            .iter()
            .filter(|(_, value)| **value > 0.0)
            .map(|(scope, value)| (*scope, *value))
            .collect();
        entries.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        entries.truncate(k);
        entries.into_iter().map(|(scope, _)| scope).collect()
    }

    pub fn summary_value(&self, scope: Scope) -> f64 {
        self.summary.frequencies.get(&scope).copied().unwrap_or(0.0)
    }

    pub fn clear(&mut self) {
        self.cursor = 0;
        self.buckets = vec![Bucket::default(); self.num_buckets];
        self.summary = Bucket::default();
    }

    /// Number of adds discarded by the per-bucket scope cap.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Invariant check: the summary equals the per-scope sum over all
    /// buckets. Drift here is a logic error, never a runtime condition.
    pub fn summary_matches_buckets(&self) -> bool {
        let mut totals: HashMap<Scope, f64> = HashMap::new();
        for bucket in &self.buckets {
            for (scope, value) in &bucket.frequencies {
                *totals.entry(*scope).or_insert(0.0) += value;
            }
        }
        for (scope, value) in &self.summary.frequencies {
            if (totals.remove(scope).unwrap_or(0.0) - value).abs() > 1e-9 {
                return false;
            }
        }
        totals.values().all(|value| value.abs() < 1e-9)
    }

    fn tick(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        let elapsed_ticks = (elapsed.as_nanos() / self.granularity.as_nanos().max(1)) as usize;
        if elapsed_ticks < 1 {
            return;
        }
        self.last_tick = now;
        if elapsed_ticks >= self.num_buckets {
            // The whole window has aged out; no retained history.
            self.clear();
            return;
        }
        for _ in 0..elapsed_ticks {
            self.cursor = (self.cursor + 1) % self.num_buckets;
            self.evict(self.cursor);
        }
    }

    fn evict(&mut self, pos: usize) {
        let old = std::mem::take(&mut self.buckets[pos]);
        for (scope, value) in &old.frequencies {
            if let Some(total) = self.summary.frequencies.get_mut(scope) {
                *total -= value;
                if total.abs() < 1e-9 {
                    self.summary.frequencies.remove(scope);
                }
            }
        }
    }
}
