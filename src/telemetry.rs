//! In-process metrics: counters, gauges, and duration histograms behind a
//! cloneable handle.
//!
//! There is deliberately no exporter here. The registry is a sink the core
//! components write into; tests read snapshots and the platform binary logs
//! one at shutdown. The handle is passed into constructors rather than living
//! in a process-wide global, so its lifecycle is tied to the component that
//! owns it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bounds (milliseconds) for duration histograms, plus an implicit
/// overflow bucket.
const DURATION_BUCKETS_MS: [u64; 12] = [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Debug, Clone)]
pub struct Histogram {
    bounds: Vec<u64>,
    counts: Vec<u64>,
    total: u64,
}

impl Histogram {
    fn for_durations() -> Self {
        Self {
            bounds: DURATION_BUCKETS_MS.to_vec(),
            counts: vec![0; DURATION_BUCKETS_MS.len() + 1],
            total: 0,
        }
    }

    fn observe(&mut self, value_ms: u64) {
        let slot = self
            .bounds
            .iter()
            .position(|bound| value_ms <= *bound)
            .unwrap_or(self.bounds.len());
        self.counts[slot] += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }
}

#[derive(Debug)]
pub struct MetricsRegistry {
    namespace: String,
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    samples: HashMap<String, Histogram>,
}

impl MetricsRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            counters: HashMap::new(),
            gauges: HashMap::new(),
            samples: HashMap::new(),
        }
    }

    pub fn inc_counter(&mut self, name: &str, delta: u64) -> u64 {
        let key = self.qualify(name);
        let counter = self.counters.entry(key).or_insert(0);
        *counter = counter.saturating_add(delta);
        *counter
    }

    pub fn set_gauge(&mut self, name: &str, value: f64) {
        let key = self.qualify(name);
        self.gauges.insert(key, value);
    }

    pub fn observe_duration(&mut self, name: &str, value: Duration) {
        let key = self.qualify(name);
        self.samples
            .entry(key)
            .or_insert_with(Histogram::for_durations)
            .observe(value.as_millis() as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
            samples: self
                .samples
                .iter()
                .map(|(name, hist)| (name.clone(), hist.clone()))
                .collect(),
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.namespace, name)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub samples: HashMap<String, Histogram>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).copied()
    }
}

/// Cloneable handle shared by every component that emits metrics.
///
/// Emission is best-effort: a poisoned registry mutex drops the sample
/// rather than propagating, since telemetry must never take down the
/// serving path.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    registry: Arc<Mutex<MetricsRegistry>>,
}

impl MetricsHandle {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(MetricsRegistry::new(namespace))),
        }
    }

    pub fn inc_counter(&self, name: &str, delta: u64) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.inc_counter(name, delta);
        }
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.set_gauge(name, value);
        }
    }

    pub fn observe_duration(&self, name: &str, value: Duration) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.observe_duration(name, value);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.registry
            .lock()
            .map(|registry| registry.snapshot())
            .unwrap_or_else(|_| MetricsSnapshot {
                counters: HashMap::new(),
                gauges: HashMap::new(),
                samples: HashMap::new(),
            })
    }
}

impl Default for MetricsHandle {
    fn default() -> Self {
        Self::new("loadgate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_under_namespace() {
        let handle = MetricsHandle::new("sim");
        handle.inc_counter("request.count", 1);
        handle.inc_counter("request.count", 2);
        assert_eq!(handle.snapshot().counter("sim.request.count"), 3);
    }

    #[test]
    fn duration_samples_land_in_bounded_buckets() {
        let mut registry = MetricsRegistry::new("");
        registry.observe_duration("latency", Duration::from_millis(3));
        registry.observe_duration("latency", Duration::from_secs(60));
        let snapshot = registry.snapshot();
        let histogram = snapshot.samples.get("latency").unwrap();
        assert_eq!(histogram.total(), 2);
        // 3ms falls in the <=5ms bucket, 60s in the overflow bucket.
        assert_eq!(histogram.counts()[2], 1);
        assert_eq!(*histogram.counts().last().unwrap(), 1);
    }
}
