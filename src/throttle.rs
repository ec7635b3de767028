//! Probabilistic admit/reject gates and the table of active throttles.

use crate::scope::Scope;
use crate::util::error::ProtocolError;
use rand::Rng;
use std::collections::HashMap;
use std::sync::RwLock;

/// Memoryless Bernoulli gate: admits a request with probability
/// `1 - rate`. `scope: None` is the pool-wide throttle.
#[derive(Debug, Clone, PartialEq)]
pub struct Throttle {
    pub scope: Option<Scope>,
    pub rate: f64,
}

impl Throttle {
    pub fn for_scope(scope: Scope, rate: f64) -> Self {
        Self {
            scope: Some(scope),
            rate: rate.clamp(0.0, 1.0),
        }
    }

    pub fn global(rate: f64) -> Self {
        Self {
            scope: None,
            rate: rate.clamp(0.0, 1.0),
        }
    }

    pub fn allow(&self) -> bool {
        self.allow_with(rand::thread_rng().gen::<f64>())
    }

    /// Decides from a caller-supplied uniform sample in `[0, 1)`; each call
    /// is independent of every other.
    pub fn allow_with(&self, sample: f64) -> bool {
        sample >= self.rate
    }
}

/// Active throttles keyed by scope, plus an optional global slot.
///
/// Reads (`allow`) take the lock shared and run concurrently with each
/// other; activation and clearing are exclusive, so a clear is atomic with
/// respect to every in-flight admission check.
#[derive(Debug, Default)]
pub struct ThrottleTable {
    inner: RwLock<TableState>,
}

#[derive(Debug, Default)]
struct TableState {
    scoped: HashMap<Scope, Throttle>,
    global: Option<Throttle>,
}

impl ThrottleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consults the active throttles for `scope`. The global throttle, when
    /// present, decides alone; otherwise a matching per-scope throttle
    /// decides; no match admits.
    pub fn allow(&self, scope: Scope) -> Result<bool, ProtocolError> {
        let state = self
            .inner
            .read()
            .map_err(|_| ProtocolError::Poisoned { context: "throttle table" })?;
        if let Some(global) = &state.global {
            return Ok(global.allow());
        }
        match state.scoped.get(&scope) {
            Some(throttle) => Ok(throttle.allow()),
            None => Ok(true),
        }
    }

    pub fn activate(&self, throttle: Throttle) -> Result<(), ProtocolError> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ProtocolError::Poisoned { context: "throttle table" })?;
        match throttle.scope {
            Some(scope) => {
                state.scoped.insert(scope, throttle);
            }
            None => state.global = Some(throttle),
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), ProtocolError> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| ProtocolError::Poisoned { context: "throttle table" })?;
        state.scoped.clear();
        state.global = None;
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool, ProtocolError> {
        let state = self
            .inner
            .read()
            .map_err(|_| ProtocolError::Poisoned { context: "throttle table" })?;
        Ok(state.scoped.is_empty() && state.global.is_none())
    }
}
