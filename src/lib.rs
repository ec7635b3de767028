//! loadgate: a simulated multi-tenant serving platform for designing and
//! evaluating overload protection and admission control.
//!
//! The platform models a fixed-capacity worker pool behind an admission
//! gate. Live load signals (queueing delay, worker occupancy, per-tenant
//! cost) feed an overload detector; under sustained overload a throttling
//! strategy sheds a controlled fraction of traffic, globally or against the
//! heaviest tenant, until health recovers.
//!
//! Core subsystems:
//!
//! - [`pool`]: the rate-limited worker pool draining one shared bounded
//!   queue, the platform's backpressure point.
//! - [`window`] / [`tracker`]: sliding-window per-scope usage aggregation.
//! - [`throttle`], [`detector`], [`shed`]: the admission policies — a
//!   Bernoulli throttle table driven by a hysteresis health machine, and a
//!   deterministic progressive shedder.
//! - [`admission`]: the `AccessController` contract the transport edge
//!   consumes.
//! - [`edge`] / [`net`]: the HTTP simulation edge and its plumbing.
//! - [`loadgen`]: phased synthetic traffic for experiments.

pub mod admission;
pub mod config;
pub mod detector;
pub mod edge;
pub mod limiter;
pub mod loadgen;
pub mod net;
pub mod pool;
pub mod queue;
pub mod request;
pub mod scope;
pub mod shed;
pub mod telemetry;
pub mod throttle;
pub mod timeouts;
pub mod tracker;
pub mod util;
pub mod window;

pub use admission::{AccessController, GatedController, LoadAnalyzer, PassthroughController};
pub use config::{PlatformConfig, StrategyConfig, TrackerConfig};
pub use detector::{DetectorConfig, OverloadDetector, ThrottlePolicy};
pub use edge::{EdgeConfig, EdgeHandle, SimulationEdge};
pub use limiter::RateLimiter;
pub use loadgen::{Generator, GeneratorReport, LoadPhase, LoadPlan};
pub use pool::{DelayedResponder, PoolConfig, PoolHandle, RequestHandler, WorkerPool};
pub use queue::WorkQueue;
pub use request::{
    RequestRecord, STATUS_INTERNAL_ERROR, STATUS_OK, STATUS_TOO_MANY_REQUESTS,
};
pub use scope::Scope;
pub use shed::{LoadSignal, ProgressiveShedder, ShedConfig, ShedSchedule};
pub use telemetry::{MetricsHandle, MetricsRegistry, MetricsSnapshot};
pub use throttle::{Throttle, ThrottleTable};
pub use tracker::{ProcessingTimeSumTracker, SlidingWindowRequestTracker, UsageTracker};
pub use util::error::{ConfigError, NetError, PlatformError, PoolError};
pub use window::SlidingWindowCounter;
