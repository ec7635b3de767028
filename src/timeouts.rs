//! Centralized timeout and shutdown policies.
//!
//! Keeping these values in one place makes it clear which parts of the
//! system share behaviour and gives us a single knob to turn if we need to
//! tighten or relax limits.

use std::time::Duration;

/// Per-connection read/write timeout on the simulation edge.
pub const EDGE_STREAM_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace period granted to blocking servers when asked to shut down.
pub const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// How often the pool reporter publishes occupancy gauges.
pub const POOL_REPORT_INTERVAL: Duration = Duration::from_secs(1);
/// Sleep slice used by cancellable blocking waits.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);
