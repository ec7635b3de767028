//! Platform configuration: a JSON document read once at process start.
//!
//! Strategy selection is an internally tagged enum, so a misspelled or
//! unknown strategy name fails deserialization and the process refuses to
//! run. Silently falling back to "no load control" would mask a
//! misconfigured overload policy.

use crate::admission::{AccessController, GatedController, PassthroughController};
use crate::detector::{DetectorConfig, OverloadDetector, ThrottlePolicy};
use crate::shed::{LoadSignal, ProgressiveShedder, ShedConfig};
use crate::telemetry::MetricsHandle;
use crate::tracker::{ProcessingTimeSumTracker, SlidingWindowRequestTracker, UsageTracker};
use crate::util::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConfig {
    #[serde(default = "defaults::port")]
    pub port: u16,
    pub num_workers: usize,
    pub max_rps_per_worker: u32,
    #[serde(default = "defaults::queue_capacity")]
    pub queue_capacity: usize,
    /// Simulated downstream handling time per request.
    pub worker_response_time_ms: u64,
    /// Lag before completed requests reach the feedback path.
    #[serde(default)]
    pub feedback_delay_ms: u64,
    #[serde(default)]
    pub max_connections: Option<usize>,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case", deny_unknown_fields)]
pub enum StrategyConfig {
    /// No load control; every request is admitted.
    None,
    /// Detector-driven pool-wide Bernoulli shedding.
    Global {
        #[serde(default = "defaults::global_rate")]
        rate: f64,
        overload_threshold_ms: u64,
        circuit_timeout_ms: u64,
        window_secs: u64,
        #[serde(default)]
        tracker: TrackerConfig,
    },
    /// Detector-driven full block of the heaviest scope.
    TopHitter {
        overload_threshold_ms: u64,
        circuit_timeout_ms: u64,
        window_secs: u64,
        #[serde(default)]
        tracker: TrackerConfig,
    },
    /// Progressive shedding on the queueing-delay signal (limits in ms).
    ProgressiveQueueing {
        soft_limit_ms: f64,
        hard_limit_ms: f64,
        steps: u32,
    },
    /// Progressive shedding on the busy-worker count.
    ProgressiveBusyWorkers {
        soft_limit: f64,
        hard_limit: f64,
        steps: u32,
    },
}

/// How the detector attributes usage to scopes when picking a top hitter.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TrackerConfig {
    /// One unit per completed request, aged out by the sliding window.
    RequestCount,
    /// Rolling sum of the last `samples` processing times per scope.
    ProcessingTimeSum { samples: usize },
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig::RequestCount
    }
}

impl TrackerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            TrackerConfig::RequestCount => Ok(()),
            TrackerConfig::ProcessingTimeSum { samples } if *samples == 0 => {
                invalid("tracker samples must be at least 1")
            }
            TrackerConfig::ProcessingTimeSum { .. } => Ok(()),
        }
    }

    fn build(self, window: Duration) -> Box<dyn UsageTracker> {
        match self {
            TrackerConfig::RequestCount => Box::new(SlidingWindowRequestTracker::new(window)),
            TrackerConfig::ProcessingTimeSum { samples } => {
                Box::new(ProcessingTimeSumTracker::new(samples))
            }
        }
    }
}

mod defaults {
    pub fn port() -> u16 {
        8080
    }

    pub fn queue_capacity() -> usize {
        1000
    }

    pub fn global_rate() -> f64 {
        0.5
    }
}

impl PlatformConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: PlatformConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return invalid("num_workers must be at least 1");
        }
        if self.max_rps_per_worker == 0 {
            return invalid("max_rps_per_worker must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1");
        }
        self.strategy.validate()
    }

    pub fn worker_response_time(&self) -> Duration {
        Duration::from_millis(self.worker_response_time_ms)
    }

    pub fn feedback_delay(&self) -> Duration {
        Duration::from_millis(self.feedback_delay_ms)
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StrategyConfig::None => Ok(()),
            StrategyConfig::Global {
                rate,
                overload_threshold_ms,
                window_secs,
                tracker,
                ..
            } => {
                if !(0.0..=1.0).contains(rate) {
                    return invalid("global throttle rate must be within [0, 1]");
                }
                if *overload_threshold_ms == 0 {
                    return invalid("overload_threshold_ms must be positive");
                }
                if *window_secs == 0 {
                    return invalid("window_secs must be positive");
                }
                tracker.validate()
            }
            StrategyConfig::TopHitter {
                overload_threshold_ms,
                window_secs,
                tracker,
                ..
            } => {
                if *overload_threshold_ms == 0 {
                    return invalid("overload_threshold_ms must be positive");
                }
                if *window_secs == 0 {
                    return invalid("window_secs must be positive");
                }
                tracker.validate()
            }
            StrategyConfig::ProgressiveQueueing {
                soft_limit_ms: soft,
                hard_limit_ms: hard,
                steps,
            }
            | StrategyConfig::ProgressiveBusyWorkers {
                soft_limit: soft,
                hard_limit: hard,
                steps,
            } => {
                if soft >= hard {
                    return invalid("soft limit must be below the hard limit");
                }
                if *steps == 0 {
                    return invalid("steps must be at least 1");
                }
                Ok(())
            }
        }
    }

    /// Wires the configured analyzer into an access controller.
    pub fn build_controller(&self, metrics: &MetricsHandle) -> Arc<dyn AccessController> {
        match *self {
            StrategyConfig::None => Arc::new(PassthroughController),
            StrategyConfig::Global {
                rate,
                overload_threshold_ms,
                circuit_timeout_ms,
                window_secs,
                tracker,
            } => Arc::new(GatedController::new(
                Box::new(OverloadDetector::new(
                    DetectorConfig {
                        overload_threshold: Duration::from_millis(overload_threshold_ms),
                        circuit_timeout: Duration::from_millis(circuit_timeout_ms),
                        policy: ThrottlePolicy::Global { rate },
                    },
                    tracker.build(Duration::from_secs(window_secs)),
                    metrics.clone(),
                )),
                metrics.clone(),
            )),
            StrategyConfig::TopHitter {
                overload_threshold_ms,
                circuit_timeout_ms,
                window_secs,
                tracker,
            } => Arc::new(GatedController::new(
                Box::new(OverloadDetector::new(
                    DetectorConfig {
                        overload_threshold: Duration::from_millis(overload_threshold_ms),
                        circuit_timeout: Duration::from_millis(circuit_timeout_ms),
                        policy: ThrottlePolicy::TopHitter,
                    },
                    tracker.build(Duration::from_secs(window_secs)),
                    metrics.clone(),
                )),
                metrics.clone(),
            )),
            StrategyConfig::ProgressiveQueueing {
                soft_limit_ms,
                hard_limit_ms,
                steps,
            } => Arc::new(GatedController::new(
                Box::new(ProgressiveShedder::new(
                    ShedConfig {
                        soft_limit: soft_limit_ms,
                        hard_limit: hard_limit_ms,
                        steps,
                        signal: LoadSignal::QueueingTime,
                    },
                    metrics.clone(),
                )),
                metrics.clone(),
            )),
            StrategyConfig::ProgressiveBusyWorkers {
                soft_limit,
                hard_limit,
                steps,
            } => Arc::new(GatedController::new(
                Box::new(ProgressiveShedder::new(
                    ShedConfig {
                        soft_limit,
                        hard_limit,
                        steps,
                        signal: LoadSignal::BusyWorkers,
                    },
                    metrics.clone(),
                )),
                metrics.clone(),
            )),
        }
    }
}

fn invalid(reason: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid {
        reason: reason.to_string(),
    })
}
