//! Per-worker token-bucket rate limiting.

use crate::timeouts::CANCEL_POLL_INTERVAL;
use crate::util::error::PoolError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Token bucket admitting `rate_per_sec` acquisitions per second with a
/// burst of one. Each worker owns its own limiter, so the hot path never
/// contends on a pool-wide lock.
///
/// `acquire` blocks until a token is available or the shared cancel flag is
/// raised; cancellation is the expected shutdown path and surfaces as
/// `PoolError::Cancelled` rather than a panic.
pub struct RateLimiter {
    rate_per_sec: f64,
    state: Mutex<BucketState>,
    cancel: Arc<AtomicBool>,
}

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    /// `rate_per_sec` must be positive; config validation enforces this
    /// before a pool is constructed.
    pub fn new(rate_per_sec: u32, cancel: Arc<AtomicBool>) -> Self {
        Self {
            rate_per_sec: f64::from(rate_per_sec.max(1)),
            state: Mutex::new(BucketState {
                tokens: 1.0,
                refilled_at: Instant::now(),
            }),
            cancel,
        }
    }

    /// Blocks until one token is available, then consumes it.
    pub fn acquire(&self) -> Result<(), PoolError> {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(PoolError::Cancelled);
            }
            let wait = {
                let mut state = self
                    .state
                    .lock()
                    .map_err(|_| crate::util::error::ProtocolError::Poisoned {
                        context: "rate limiter",
                    })?;
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(state.refilled_at);
                state.tokens =
                    (state.tokens + elapsed.as_secs_f64() * self.rate_per_sec).min(1.0);
                state.refilled_at = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate_per_sec)
            };
            std::thread::sleep(wait.min(CANCEL_POLL_INTERVAL));
        }
    }
}
